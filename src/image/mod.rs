pub mod f32;
pub mod interpolate;
pub mod io;
pub mod traits;
pub mod volume_ref;

pub use self::f32::VolumeF32;
pub use self::interpolate::{intersects, sample, Interpolation};
pub use self::traits::{Rows, VolumeView};
pub use self::volume_ref::VolumeRef;
