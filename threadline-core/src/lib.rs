//! # threadline-core — message model and mutation rules for Threadline
//!
//! A Threadline board is a single document: an ordered list of top-level
//! messages, each carrying a tree of replies. This crate holds the model
//! and the pure read-modify-write step; storage and locking live in
//! `threadline-board`.
//!
//! ## Modules
//!
//! - [`message`] — `Message`, `Document` and their JSON form
//! - [`mutation`] — word limit, id assignment, parent lookup, retention

pub mod message;
pub mod mutation;

pub use message::{AllMessages, CodecError, Document, Message, MessageId};
pub use mutation::{
    apply_submission, trim, validate, word_count, Attachment, BoardConfig, MutationError,
    OrphanPolicy, SubmitOutcome, Submission, DEFAULT_MAX_MESSAGES, DEFAULT_MAX_WORDS,
};
