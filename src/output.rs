use crate::core::runtime::CycleRecord;
use csv::WriterBuilder;
use std::fmt::Debug;
use std::fs::File;
use std::io;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub trait Output: Debug {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write>;
    /// Whether this output can be considered a no-op and therefore that any
    /// code that only writes to the output can be skipped.
    fn is_noop(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct FileOutput {
    directory_path: PathBuf,
}

impl FileOutput {
    pub fn new(directory_path: PathBuf) -> Self {
        Self { directory_path }
    }
}

impl Output for FileOutput {
    fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write> {
        Ok(BufWriter::new(File::create(
            self.directory_path.join(format!("{location_key}.csv")),
        )?))
    }
}

/// An output that goes to nowhere/ a "sink".
#[derive(Debug, Default)]
pub struct SinkOutput;

impl Output for SinkOutput {
    fn writer_for_location_key(&self, _location_key: &str) -> anyhow::Result<impl Write> {
        Ok(io::sink())
    }

    fn is_noop(&self) -> bool {
        true
    }
}

/// Write the per-cycle session report as CSV.
pub fn write_cycle_report(output: impl Output, records: &[CycleRecord]) -> anyhow::Result<()> {
    if output.is_noop() {
        return Ok(());
    }
    let writer = output.writer_for_location_key("cycles")?;
    let mut writer = WriterBuilder::new().from_writer(writer);

    writer.write_record([
        "Cycle",
        "Measured CO2 [ppm]",
        "Applied fraction [ratio]",
        "Fell back",
        "Predicted terminal CO2 [ppm]",
    ])?;
    for record in records {
        writer.write_record([
            record.cycle.to_string(),
            record
                .measured_co2
                .map(|c| c.to_string())
                .unwrap_or_default(),
            record.applied_fraction.to_string(),
            record.fell_back.to_string(),
            record
                .predicted_terminal_co2
                .map(|c| c.to_string())
                .unwrap_or_default(),
        ])?;
    }
    writer.flush()?;

    Ok(())
}
