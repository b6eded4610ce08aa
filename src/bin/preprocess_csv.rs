use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use ephemra::{
    init_logging, logging_config_from_env, preprocess_geo, GeoPreprocessConfig, RawCsv,
    TimeSeriesTable, DEFAULT_TIMESTAMP_COLUMN,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let (input, output) = parse_args()?;
    let bytes = fs::read(&input)?;
    let raw = RawCsv::parse(&bytes)?;
    let table = TimeSeriesTable::from_csv(&raw, DEFAULT_TIMESTAMP_COLUMN)?;

    let (clean, report) = preprocess_geo(&table, &GeoPreprocessConfig::default())?;
    clean.write_csv(DEFAULT_TIMESTAMP_COLUMN, BufWriter::new(File::create(&output)?))?;

    println!(
        "Preprocessed {} -> {} | rows_in={} rows_out={} empty_bins={} hampel={} winsorized={}",
        input.display(),
        output.display(),
        report.input_rows,
        report.output_rows,
        report.empty_bins,
        report.hampel_replacements,
        report.winsorized_points
    );

    Ok(())
}

fn parse_args() -> Result<(PathBuf, PathBuf), String> {
    let mut args = std::env::args_os().skip(1);
    match (args.next(), args.next(), args.next()) {
        (Some(input), Some(output), None) => Ok((PathBuf::from(input), PathBuf::from(output))),
        _ => Err("usage: preprocess_csv <input.csv> <output.csv>".to_string()),
    }
}
