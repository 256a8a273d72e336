use crate::error::{PipelineError, Result};
use crate::models::EventRecord;
use crate::readers::time_units::TimeUnits;
use crate::utils::constants::{
    ATTR_ADD_OFFSET, ATTR_FILL_VALUE, ATTR_SCALE_FACTOR, ATTR_UNITS, ATTR_UNSIGNED,
    REQUIRED_VARIABLES, VAR_EVENT_ENERGY, VAR_EVENT_LAT, VAR_EVENT_LON, VAR_EVENT_TIME_OFFSET,
};
use netcdf3::{DataSet, DataVector, FileReader};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A variable as stored, with the CF attributes needed to unpack it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackedVariable {
    pub raw: Vec<f64>,
    pub scale_factor: Option<f64>,
    pub add_offset: Option<f64>,
    pub fill_value: Option<f64>,
    pub units: Option<String>,
    /// Bit width to reinterpret negative integers as unsigned (`_Unsigned = "true"`).
    pub unsigned_bits: Option<u32>,
}

impl PackedVariable {
    pub fn new(raw: Vec<f64>) -> Self {
        Self {
            raw,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Physical value at `index`, or `None` for fill/missing elements.
    pub fn unpack(&self, index: usize) -> Option<f64> {
        let raw = *self.raw.get(index)?;
        if raw.is_nan() {
            return None;
        }
        if let Some(fill) = self.fill_value {
            if raw == fill {
                return None;
            }
        }

        let mut value = raw;
        if let Some(bits) = self.unsigned_bits {
            if value < 0.0 {
                value += 2f64.powi(bits as i32);
            }
        }
        Some(value * self.scale_factor.unwrap_or(1.0) + self.add_offset.unwrap_or(0.0))
    }

    pub fn unpack_f32(&self, index: usize) -> f32 {
        self.unpack(index).map(|v| v as f32).unwrap_or(f32::NAN)
    }
}

/// Source of the event variables of one granule.
pub trait EventDataset {
    fn has_variable(&self, name: &str) -> bool;
    fn read_packed(&mut self, name: &str) -> Result<PackedVariable>;
}

/// netCDF classic (CDF-1/CDF-2) file opened for reading.
pub struct NetcdfDataset {
    reader: FileReader,
    path: PathBuf,
}

impl NetcdfDataset {
    pub fn open(path: &Path) -> Result<Self> {
        // a missing file is an I/O problem, not a bad granule
        std::fs::metadata(path)?;
        let reader = FileReader::open(path).map_err(|e| {
            PipelineError::malformed(path, format!("not a readable netCDF file: {:?}", e))
        })?;
        Ok(Self {
            reader,
            path: path.to_path_buf(),
        })
    }
}

impl EventDataset for NetcdfDataset {
    fn has_variable(&self, name: &str) -> bool {
        self.reader.data_set().has_var(name)
    }

    fn read_packed(&mut self, name: &str) -> Result<PackedVariable> {
        let data = self.reader.read_var(name).map_err(|e| {
            PipelineError::Decode(format!(
                "{}: reading {} failed: {:?}",
                self.path.display(),
                name,
                e
            ))
        })?;

        let (raw, bits): (Vec<f64>, Option<u32>) = match data {
            DataVector::I8(v) => (v.into_iter().map(f64::from).collect(), Some(8)),
            DataVector::U8(v) => (v.into_iter().map(f64::from).collect(), None),
            DataVector::I16(v) => (v.into_iter().map(f64::from).collect(), Some(16)),
            DataVector::I32(v) => (v.into_iter().map(f64::from).collect(), Some(32)),
            DataVector::F32(v) => (v.into_iter().map(f64::from).collect(), None),
            DataVector::F64(v) => (v, None),
        };

        let ds = self.reader.data_set();
        let unsigned = ds
            .get_var_attr_as_string(name, ATTR_UNSIGNED)
            .map(|s| s.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(PackedVariable {
            raw,
            scale_factor: numeric_attr(ds, name, ATTR_SCALE_FACTOR),
            add_offset: numeric_attr(ds, name, ATTR_ADD_OFFSET),
            fill_value: numeric_attr(ds, name, ATTR_FILL_VALUE),
            units: ds.get_var_attr_as_string(name, ATTR_UNITS),
            unsigned_bits: if unsigned { bits } else { None },
        })
    }
}

fn numeric_attr(ds: &DataSet, var: &str, attr: &str) -> Option<f64> {
    if let Some(v) = ds.get_var_attr_f64(var, attr) {
        return v.first().copied();
    }
    if let Some(v) = ds.get_var_attr_f32(var, attr) {
        return v.first().map(|&x| f64::from(x));
    }
    if let Some(v) = ds.get_var_attr_i32(var, attr) {
        return v.first().map(|&x| f64::from(x));
    }
    if let Some(v) = ds.get_var_attr_i16(var, attr) {
        return v.first().map(|&x| f64::from(x));
    }
    if let Some(v) = ds.get_var_attr_i8(var, attr) {
        return v.first().map(|&x| f64::from(x));
    }
    ds.get_var_attr_u8(var, attr)
        .and_then(|v| v.first().map(|&x| f64::from(x)))
}

/// The four event variables of one granule, checked for presence, units and
/// matching lengths. Records are built from them one range at a time.
#[derive(Debug, Clone)]
pub struct EventColumns {
    latitude: PackedVariable,
    longitude: PackedVariable,
    energy: PackedVariable,
    time: PackedVariable,
    units: TimeUnits,
}

impl EventColumns {
    pub fn read<D>(dataset: &mut D, source: &Path) -> Result<Self>
    where
        D: EventDataset + ?Sized,
    {
        let missing: Vec<&str> = REQUIRED_VARIABLES
            .iter()
            .copied()
            .filter(|name| !dataset.has_variable(name))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::malformed(
                source,
                format!("missing required variables: [{}]", missing.join(", ")),
            ));
        }

        let latitude = dataset.read_packed(VAR_EVENT_LAT)?;
        let longitude = dataset.read_packed(VAR_EVENT_LON)?;
        let energy = dataset.read_packed(VAR_EVENT_ENERGY)?;
        let time = dataset.read_packed(VAR_EVENT_TIME_OFFSET)?;

        let units_text = time.units.as_deref().ok_or_else(|| {
            PipelineError::malformed(source, format!("{} has no units attribute", VAR_EVENT_TIME_OFFSET))
        })?;
        let units = TimeUnits::parse(units_text)
            .map_err(|e| PipelineError::malformed(source, e.to_string()))?;

        let count = time.len();
        if latitude.len() != count || longitude.len() != count || energy.len() != count {
            return Err(PipelineError::malformed(
                source,
                format!(
                    "event variable lengths differ: time={}, lat={}, lon={}, energy={}",
                    count,
                    latitude.len(),
                    longitude.len(),
                    energy.len()
                ),
            ));
        }

        Ok(Self {
            latitude,
            longitude,
            energy,
            time,
            units,
        })
    }

    /// Number of events in the source arrays, including ones that will drop.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Decode events `range` into `out`, returning how many were dropped.
    ///
    /// Time elements that are fill or undecodable drop their event; fill in
    /// the other variables becomes NaN.
    pub fn decode_range(&self, range: Range<usize>, out: &mut Vec<EventRecord>) -> usize {
        let mut dropped = 0;
        for i in range {
            let Some(timestamp) = self.time.unpack(i).and_then(|offset| self.units.decode(offset)) else {
                dropped += 1;
                continue;
            };
            out.push(EventRecord::new(
                timestamp,
                self.latitude.unpack_f32(i),
                self.longitude.unpack_f32(i),
                self.energy.unpack_f32(i),
            ));
        }
        dropped
    }

    /// Decode in source order, at most `chunk_size` events at a time
    /// (`None` = all at once), handing each chunk to `sink`. Only one chunk
    /// of records exists at any moment. Returns the dropped count.
    pub fn decode_chunks<F>(&self, chunk_size: Option<usize>, mut sink: F) -> Result<usize>
    where
        F: FnMut(&[EventRecord]) -> Result<()>,
    {
        let count = self.len();
        let step = chunk_size.filter(|&n| n > 0).unwrap_or(count).max(1);
        let mut buffer = Vec::with_capacity(step.min(count));
        let mut dropped = 0;

        let mut start = 0;
        while start < count {
            let end = (start + step).min(count);
            buffer.clear();
            dropped += self.decode_range(start..end, &mut buffer);
            sink(&buffer)?;
            start = end;
        }
        Ok(dropped)
    }
}

/// Open a granule from disk and read its event variables. The file handle
/// closes on return.
pub fn open_granule(path: &Path) -> Result<EventColumns> {
    let mut dataset = NetcdfDataset::open(path)?;
    let columns = EventColumns::read(&mut dataset, path)?;
    debug!(source = %path.display(), events = columns.len(), "Read granule variables");
    Ok(columns)
}
