//! Named indices into the 68-point facial landmark scheme.
//!
//! The annotation order is fixed by the external shape model: jawline
//! (0-16), eyebrows (17-26), nose (27-35), eyes (36-47), lips (48-67).
//! Feature definitions reference these names instead of raw numbers so
//! each measurement can be audited against the scheme.

use std::ops::RangeInclusive;

/// Index positions with fixed anatomical meaning.
pub mod indices {
    // Left eyebrow, outer end to inner end.
    pub const LEFT_BROW_OUTER: usize = 17;
    pub const LEFT_BROW_INNER: usize = 21;

    // Right eyebrow, inner end to outer end.
    pub const RIGHT_BROW_INNER: usize = 22;
    pub const RIGHT_BROW_OUTER: usize = 26;

    // Nose bridge runs from the top (between the eyes) down to the tip;
    // the base spans the nostrils.
    pub const NASION: usize = 27;
    pub const NOSE_TIP: usize = 30;
    pub const NOSE_BASE_LEFT: usize = 31;
    pub const SUBNASALE: usize = 33;
    pub const NOSE_BASE_RIGHT: usize = 35;

    // Left eye: corners plus two points on each lid.
    pub const LEFT_EYE_OUTER: usize = 36;
    pub const LEFT_EYE_TOP_OUTER: usize = 37;
    pub const LEFT_EYE_TOP_INNER: usize = 38;
    pub const LEFT_EYE_INNER: usize = 39;
    pub const LEFT_EYE_BOTTOM_INNER: usize = 40;
    pub const LEFT_EYE_BOTTOM_OUTER: usize = 41;

    // Right eye, mirrored: the inner corner comes first.
    pub const RIGHT_EYE_INNER: usize = 42;
    pub const RIGHT_EYE_TOP_INNER: usize = 43;
    pub const RIGHT_EYE_TOP_OUTER: usize = 44;
    pub const RIGHT_EYE_OUTER: usize = 45;
    pub const RIGHT_EYE_BOTTOM_OUTER: usize = 46;
    pub const RIGHT_EYE_BOTTOM_INNER: usize = 47;

    // Outer lip contour.
    pub const MOUTH_LEFT: usize = 48;
    pub const UPPER_LIP_TOP: usize = 51;
    pub const MOUTH_RIGHT: usize = 54;
    pub const LOWER_LIP_BOTTOM: usize = 57;
}

/// Contiguous index ranges covering multi-point contours. Aggregate
/// features sum one normalized distance per index in the span.
pub mod spans {
    use std::ops::RangeInclusive;

    /// Arch of the left eyebrow, excluding the outermost point.
    pub const LEFT_BROW_ARCH: RangeInclusive<usize> = 18..=21;

    /// Arch of the right eyebrow, excluding the outermost point.
    pub const RIGHT_BROW_ARCH: RangeInclusive<usize> = 22..=25;

    /// Upper lip from the left mouth corner to just before the philtrum.
    pub const LEFT_LIP_CURVE: RangeInclusive<usize> = 48..=50;

    /// Upper lip from just past the philtrum to the right mouth corner.
    pub const RIGHT_LIP_CURVE: RangeInclusive<usize> = 52..=54;

    /// Nose bridge from the nasion down through the nostril line.
    pub const NOSE_BRIDGE: RangeInclusive<usize> = 27..=33;

    /// Base of the nose across both nostrils.
    pub const NOSE_BASE: RangeInclusive<usize> = 31..=35;
}

/// Returns the spans touched by the feature definitions, for bounds
/// auditing in tests.
pub fn all_spans() -> [RangeInclusive<usize>; 6] {
    [
        spans::LEFT_BROW_ARCH,
        spans::RIGHT_BROW_ARCH,
        spans::LEFT_LIP_CURVE,
        spans::RIGHT_LIP_CURVE,
        spans::NOSE_BRIDGE,
        spans::NOSE_BASE,
    ]
}
