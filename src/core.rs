//! Provides types that describe what to ask the Salt master to do.

pub mod command;
pub mod target;

#[doc(inline)]
pub use command::{ClientKind, Command};

#[doc(inline)]
pub use target::{ExprForm, Target};
