//! Service connectors: Google Calendar as the event source, Notion as the
//! record sink. Both implement the traits from `calmirror_core`.

pub mod google;
pub mod notion;
