//! I/O helpers for volumes and JSON reports.
//!
//! - `load_png_stack`: read a z-stack of grayscale PNG planes into a volume.
//! - `save_max_projection_png`: write the z maximum projection as 8-bit PNG.
//! - `write_json_file`: pretty-print a serializable value to disk.
use super::VolumeF32;
use crate::error::{Error, Result};
use image::{GrayImage, Luma};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Load one PNG per plane; all planes must share the same size.
///
/// 16-bit planes keep their raw values, 8-bit planes are widened.
pub fn load_png_stack<P: AsRef<Path>>(planes: &[P]) -> Result<VolumeF32> {
    let mut volume: Option<VolumeF32> = None;
    for (z, path) in planes.iter().enumerate() {
        let plane = image::open(path.as_ref())?.into_luma16();
        let (w, h) = (plane.width() as usize, plane.height() as usize);
        let vol = volume.get_or_insert_with(|| VolumeF32::new(w, h, planes.len()));
        if vol.w != w || vol.h != h {
            return Err(Error::InvalidParameter(format!(
                "plane {} is {w}x{h}, expected {}x{}",
                path.as_ref().display(),
                vol.w,
                vol.h
            )));
        }
        let offset = z * w * h;
        for (dst, px) in vol.data[offset..offset + w * h]
            .iter_mut()
            .zip(plane.pixels())
        {
            *dst = px[0] as f32;
        }
    }
    volume.ok_or_else(|| Error::InvalidParameter("empty plane list".to_string()))
}

/// Save the z maximum projection, scaled so the brightest voxel maps to 255.
pub fn save_max_projection_png(volume: &VolumeF32, path: &Path) -> Result<()> {
    ensure_parent_dir(path)?;
    let mip = volume.max_projection_z();
    let max = mip.iter().copied().fold(0.0f32, f32::max);
    let scale = if max > 0.0 { 255.0 / max } else { 0.0 };
    let mut out = GrayImage::new(volume.w as u32, volume.h as u32);
    for (i, &v) in mip.iter().enumerate() {
        let x = (i % volume.w) as u32;
        let y = (i / volume.w) as u32;
        out.put_pixel(x, y, Luma([(v * scale).clamp(0.0, 255.0) as u8]));
    }
    out.save(path)?;
    Ok(())
}

/// Serialize a value as pretty JSON to `path`, creating parent directories.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
