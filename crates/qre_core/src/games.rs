//! Reference payoff oracles for normal-form and extensive-form games.

pub mod table;
pub mod tree;

pub use table::TableGame;
pub use tree::GameTree;
