//! Record model, the pure record parser, field normalization, and the
//! JSON-lines sink used by callers that persist results.

pub mod normalize;
pub mod parser;
pub mod record;
pub mod sink;
