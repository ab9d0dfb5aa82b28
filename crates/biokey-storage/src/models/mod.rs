pub mod sample;

pub use sample::{NewSample, SampleRecord, TemplateRecord, format_record_id, parse_record_id};
