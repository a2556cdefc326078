//! Application layer: the USSD dialog and the services it drives.
//!
//! `UssdEngine` is the entry point. It resumes the subscriber's session
//! through the `SessionManager`, runs the step for the current keystroke and
//! hands back the reply together with any audit records to emit afterwards.

pub mod audit;
pub mod credentials;
pub mod engine;
pub mod screens;
pub mod sessions;
pub mod tokenizer;
