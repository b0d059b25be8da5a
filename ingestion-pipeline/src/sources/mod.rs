pub mod interval_csv_file;
pub mod register_csv_file;

pub use interval_csv_file::IntervalCsvFileSource;
pub use register_csv_file::RegisterCsvFileSource;
