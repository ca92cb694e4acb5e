// tconv — TRANSPORT lattice converter
//
// Library root. Passes run in the order tokenize, populate, reconcile,
// combine drifts, build; see `pipeline`.

pub mod builders;
pub mod combine;
pub mod diag;
pub mod error;
pub mod gmad;
pub mod id;
pub mod lexer;
pub mod machine;
pub mod madx;
pub mod naming;
pub mod pass;
pub mod pipeline;
pub mod populate;
pub mod reconcile;
pub mod record;
pub mod registry;
pub mod session;
pub mod state;
pub mod tokenizer;
pub mod units;
