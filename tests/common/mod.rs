#![allow(dead_code)]

use glm_etl::utils::constants::{
    ATTR_UNITS, VAR_EVENT_ENERGY, VAR_EVENT_LAT, VAR_EVENT_LON, VAR_EVENT_TIME_OFFSET,
};
use netcdf3::{DataSet, FileWriter, Version};
use std::path::{Path, PathBuf};

pub const BUCKET: &str = "noaa-goes18";
pub const PRODUCT: &str = "GLM-L2-LCFA";
pub const TIME_UNITS: &str = "seconds since 2023-02-17 21:00:00";
pub const PREFIX: &str = "GLM-L2-LCFA/2023/048/21/";

/// One event as (latitude, longitude, energy, seconds after the reference time).
pub type FixtureEvent = (f32, f32, f32, f32);

pub fn sample_events(n: usize) -> Vec<FixtureEvent> {
    (0..n)
        .map(|i| {
            (
                25.0 + i as f32 * 0.25,
                -100.0 + i as f32 * 0.5,
                (i + 1) as f32 * 1.0e-15,
                i as f32 * 0.5,
            )
        })
        .collect()
}

/// Write a classic netCDF granule holding `events`. Variables named in
/// `omit` are left out of the file.
pub fn write_granule(path: &Path, events: &[FixtureEvent], omit: &[&str]) {
    let dim = "number_of_events";
    let mut data_set = DataSet::new();
    data_set.add_fixed_dim(dim, events.len()).unwrap();

    let columns: [(&str, Vec<f32>); 4] = [
        (VAR_EVENT_LAT, events.iter().map(|e| e.0).collect()),
        (VAR_EVENT_LON, events.iter().map(|e| e.1).collect()),
        (VAR_EVENT_ENERGY, events.iter().map(|e| e.2).collect()),
        (VAR_EVENT_TIME_OFFSET, events.iter().map(|e| e.3).collect()),
    ];
    let kept: Vec<&(&str, Vec<f32>)> = columns
        .iter()
        .filter(|(name, _)| !omit.contains(name))
        .collect();

    for (name, _) in &kept {
        data_set.add_var_f32(name, &[dim]).unwrap();
    }
    if !omit.contains(&VAR_EVENT_TIME_OFFSET) {
        data_set
            .add_var_attr_string(VAR_EVENT_TIME_OFFSET, ATTR_UNITS, TIME_UNITS)
            .unwrap();
    }

    let mut writer = FileWriter::open(path).unwrap();
    writer.set_def(&data_set, Version::Classic, 0).unwrap();
    for (name, values) in &kept {
        writer.write_var_f32(name, values).unwrap();
    }
    writer.close().unwrap();
}

/// Granule bytes, for seeding an object store.
pub fn granule_bytes(events: &[FixtureEvent], omit: &[&str]) -> Vec<u8> {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("granule.nc");
    write_granule(&path, events, omit);
    std::fs::read(path).unwrap()
}

pub fn write_event_csv(dir: &Path, name: &str, body: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, format!("timestamp,latitude,longitude,energy\n{}", body)).unwrap();
    path
}

pub fn granule_key(name: &str) -> String {
    format!("{}{}", PREFIX, name)
}
