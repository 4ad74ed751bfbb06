// Pipeline processing: gating, extraction, verification, validation, and provider detection

pub mod extraction;
pub mod providers;
pub mod signal;
pub mod validation;
pub mod verification;
