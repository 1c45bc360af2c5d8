/// Outcome of screening one frame for an in-focus crystal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassificationResult {
    /// Did the frame contain enough sharp edges?
    pub accepted: bool,
    /// Number of pixels whose gradient magnitude cleared the edge threshold.
    pub sharp_edge_count: u64,
}
