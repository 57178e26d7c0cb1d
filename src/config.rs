//! Ambient knobs that do not change wire semantics (SPEC_FULL.md §2/§10).

/// Options controlling how a [`crate::reader::Reader`] opens and traverses
/// archives.
#[derive(Debug, Clone, Copy)]
pub struct ReaderConfig {
    /// Run the stricter payload sanity pass (§4.6) while scanning to
    /// locate an archive's true end.
    pub paranoid: bool,
    /// Treat a missing `.index` file as "no index, fall back to linear
    /// positioning" rather than an error. The source tolerates this
    /// unconditionally (§4.5 step 4); the flag exists so a caller auditing
    /// an archive for completeness can opt out and treat it as fatal.
    pub tolerate_missing_index: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            paranoid: false,
            tolerate_missing_index: true,
        }
    }
}

/// Options controlling [`crate::writer::Writer`] payload framing.
#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    /// v1: payload buffer has no trailer slack, two writes per record.
    /// v2: payload buffer includes trailer space, one write per record.
    pub buffer_includes_trailer: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            buffer_includes_trailer: true,
        }
    }
}
