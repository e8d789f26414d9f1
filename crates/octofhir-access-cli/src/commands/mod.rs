pub mod check;
pub mod checkers;
