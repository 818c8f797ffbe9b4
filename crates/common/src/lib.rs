//! Shared types for the veinmine workspace.
//!
//! # Invariants
//! - `Position::FACE_OFFSETS` order is fixed: -x, -y, -z, +x, +y, +z.
//! - `Material` is a closed set; names round-trip through `FromStr`/`Display`.

mod material;
mod types;

pub use material::{Material, ParseMaterialError, ToolCategory};
pub use types::{ItemStack, PlayerId, Position, ServerId};

pub fn crate_info() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("common"));
    }
}
