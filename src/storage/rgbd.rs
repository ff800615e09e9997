//! RGBD capture container.
//!
//! A capture is stored as a compressed NumPy `.npz` archive so it can be opened
//! directly with `numpy.load`. Entries:
//!
//! | name          | dtype   | shape     |
//! |---------------|---------|-----------|
//! | `rgb_image`   | uint8   | H x W x 3 |
//! | `depth_image` | uint16  | H x W     |
//! | `depth_scale` | float32 | scalar    |
//! | `fx`, `fy`    | float32 | scalar    |
//! | `ppx`, `ppy`  | float32 | scalar    |
//!
//! Readers require the two images; everything else is optional, with `fx`/`fy`
//! falling back to the factory intrinsics of the kiosk camera.

use ndarray::{arr0, Array0, Array2, Array3, ArrayBase, DataOwned, Dimension};
use ndarray_npy::{NpzReader, NpzWriter, ReadableElement};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::acquisition::frame::SensorFrame;
use crate::error::{AppResult, KioskError};
use crate::hardware::capabilities::CameraIntrinsics;

const RGB_IMAGE: &str = "rgb_image";
const DEPTH_IMAGE: &str = "depth_image";
const DEPTH_SCALE: &str = "depth_scale";
const FX: &str = "fx";
const FY: &str = "fy";
const PPX: &str = "ppx";
const PPY: &str = "ppy";

/// Contents of an RGBD container.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbdContainer {
    /// H x W x 3 RGB image
    pub rgb_image: Array3<u8>,
    /// H x W depth in device units
    pub depth_image: Array2<u16>,
    /// Device units to meters, if recorded
    pub depth_scale: Option<f32>,
    /// Focal length x (defaulted when absent)
    pub fx: f32,
    /// Focal length y (defaulted when absent)
    pub fy: f32,
    /// Principal point x, if recorded
    pub ppx: Option<f32>,
    /// Principal point y, if recorded
    pub ppy: Option<f32>,
}

impl RgbdContainer {
    /// Depth converted to meters. A missing scale counts as 1.
    pub fn depth_meters(&self) -> Array2<f32> {
        let scale = self.depth_scale.unwrap_or(1.0);
        self.depth_image.mapv(|d| d as f32 * scale)
    }

    /// (height, width)
    pub fn resolution(&self) -> (usize, usize) {
        self.depth_image.dim()
    }
}

/// Write `frame` to `path` as a compressed container.
///
/// The archive is assembled next to the target and renamed into place, so a
/// failed write never leaves a truncated file under the final name. An existing
/// file with the same name is replaced.
///
/// # Errors
/// `FileWriteFailure` naming `path`.
pub fn write_container(path: &Path, frame: &SensorFrame) -> AppResult<()> {
    let partial = partial_path(path);
    let result = write_npz(&partial, frame).and_then(|()| {
        fs::rename(&partial, path).map_err(|e| e.to_string())
    });

    match result {
        Ok(()) => {
            debug!(path = %path.display(), sequence = frame.sequence, "RGBD container written");
            Ok(())
        }
        Err(message) => {
            let _ = fs::remove_file(&partial);
            Err(KioskError::FileWriteFailure {
                path: path.to_path_buf(),
                message,
            })
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn write_npz(path: &Path, frame: &SensorFrame) -> Result<(), String> {
    let file = File::create(path).map_err(|e| e.to_string())?;
    let mut npz = NpzWriter::new_compressed(BufWriter::new(file));
    let CameraIntrinsics { fx, fy, ppx, ppy } = frame.intrinsics;

    let add = |npz: &mut NpzWriter<BufWriter<File>>, name: &str, value: f32| {
        npz.add_array(name, &arr0(value)).map_err(|e| e.to_string())
    };

    npz.add_array(RGB_IMAGE, &frame.rgb).map_err(|e| e.to_string())?;
    npz.add_array(DEPTH_IMAGE, &frame.depth)
        .map_err(|e| e.to_string())?;
    add(&mut npz, DEPTH_SCALE, frame.depth_scale)?;
    add(&mut npz, FX, fx)?;
    add(&mut npz, FY, fy)?;
    add(&mut npz, PPX, ppx)?;
    add(&mut npz, PPY, ppy)?;

    let writer = npz.finish().map_err(|e| e.to_string())?;
    writer
        .into_inner()
        .map_err(|e| e.to_string())?
        .sync_all()
        .map_err(|e| e.to_string())
}

/// Read a container written by [`write_container`] or by NumPy.
///
/// # Errors
/// `Container` if the file cannot be opened, is not an archive, or lacks one of
/// the two images.
pub fn read_container(path: &Path) -> AppResult<RgbdContainer> {
    let file = File::open(path).map_err(|e| container_error(path, e))?;
    let mut npz = NpzReader::new(BufReader::new(file)).map_err(|e| container_error(path, e))?;
    let names: Vec<String> = npz
        .names()
        .map_err(|e| container_error(path, e))?
        .into_iter()
        .map(|n| n.trim_end_matches(".npy").to_string())
        .collect();
    let has = |name: &str| names.iter().any(|n| n == name);

    for required in [RGB_IMAGE, DEPTH_IMAGE] {
        if !has(required) {
            return Err(KioskError::Container(format!(
                "{}: missing '{}'",
                path.display(),
                required
            )));
        }
    }

    let rgb_image: Array3<u8> = read_entry(&mut npz, RGB_IMAGE).map_err(|e| container_error(path, e))?;
    let depth_image: Array2<u16> =
        read_entry(&mut npz, DEPTH_IMAGE).map_err(|e| container_error(path, e))?;

    let mut scalar = |name: &str| -> AppResult<Option<f32>> {
        if !has(name) {
            return Ok(None);
        }
        let value: Array0<f32> = read_entry(&mut npz, name).map_err(|e| container_error(path, e))?;
        Ok(Some(value.into_scalar()))
    };

    Ok(RgbdContainer {
        depth_scale: scalar(DEPTH_SCALE)?,
        fx: scalar(FX)?.unwrap_or(CameraIntrinsics::DEFAULT_FX),
        fy: scalar(FY)?.unwrap_or(CameraIntrinsics::DEFAULT_FY),
        ppx: scalar(PPX)?,
        ppy: scalar(PPY)?,
        rgb_image,
        depth_image,
    })
}

/// Archives from NumPy name entries `x.npy`; accept either spelling.
fn read_entry<S, D>(
    npz: &mut NpzReader<BufReader<File>>,
    name: &str,
) -> Result<ArrayBase<S, D>, ndarray_npy::ReadNpzError>
where
    S: DataOwned,
    S::Elem: ReadableElement,
    D: Dimension,
{
    match npz.by_name(name) {
        Ok(array) => Ok(array),
        Err(first) => npz.by_name(&format!("{}.npy", name)).map_err(|_| first),
    }
}

fn container_error(path: &Path, err: impl std::fmt::Display) -> KioskError {
    KioskError::Container(format!("{}: {}", path.display(), err))
}
