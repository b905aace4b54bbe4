use crate::pipeline::store::write_with;
use crate::pipeline::*;

use arrow::array::{
    ArrayRef, BooleanArray, Date32Array, ListBuilder, StringArray, StringBuilder, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType as ArrowType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use std::sync::Arc;
use vote_records::{Mandate, NormalizedVoteRecord, Poll, SheetVote, Vote};

fn days_since_epoch(date: Option<NaiveDate>) -> Option<i32> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    date.map(|d| (d - epoch).num_days() as i32)
}

fn strings<'a, I: Iterator<Item = &'a str>>(values: I) -> ArrayRef {
    Arc::new(StringArray::from(values.collect::<Vec<&str>>()))
}

fn optional_strings<'a, I: Iterator<Item = Option<&'a str>>>(values: I) -> ArrayRef {
    Arc::new(StringArray::from(values.collect::<Vec<Option<&str>>>()))
}

fn dates<I: Iterator<Item = Option<NaiveDate>>>(values: I) -> ArrayRef {
    Arc::new(Date32Array::from(
        values.map(days_since_epoch).collect::<Vec<Option<i32>>>(),
    ))
}

fn write_table(path: &Path, fields: Vec<Field>, columns: Vec<ArrayRef>) -> PipelineResult<()> {
    let p = path.display().to_string();
    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), columns).context(ArrowSnafu { path: p.clone() })?;
    write_with(path, |file| {
        let mut writer =
            ArrowWriter::try_new(file, schema, None).context(ParquetSnafu { path: p.clone() })?;
        writer.write(&batch).context(ParquetSnafu { path: p.clone() })?;
        writer.close().context(ParquetSnafu { path: p.clone() })?;
        Ok(())
    })?;
    info!("write_table: {} rows to {}", batch.num_rows(), p);
    Ok(())
}

pub fn write_sheet_votes(path: &Path, votes: &[SheetVote]) -> PipelineResult<()> {
    let fields = vec![
        Field::new("legislative_period", ArrowType::UInt32, false),
        Field::new("session", ArrowType::UInt32, false),
        Field::new("ballot", ArrowType::UInt32, false),
        Field::new("faction", ArrowType::Utf8, false),
        Field::new("surname", ArrowType::Utf8, false),
        Field::new("first_name", ArrowType::Utf8, false),
        Field::new("honorific", ArrowType::Utf8, false),
        Field::new("display_name", ArrowType::Utf8, false),
        Field::new("remark", ArrowType::Utf8, true),
        Field::new("vote", ArrowType::Utf8, false),
        Field::new("date", ArrowType::Date32, true),
        Field::new("title", ArrowType::Utf8, false),
        Field::new("sheet_name", ArrowType::Utf8, false),
    ];
    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt32Array::from(
            votes.iter().map(|v| v.member.legislative_period).collect::<Vec<u32>>(),
        )),
        Arc::new(UInt32Array::from(
            votes.iter().map(|v| v.member.session).collect::<Vec<u32>>(),
        )),
        Arc::new(UInt32Array::from(
            votes.iter().map(|v| v.member.ballot).collect::<Vec<u32>>(),
        )),
        strings(votes.iter().map(|v| v.member.faction.as_str())),
        strings(votes.iter().map(|v| v.member.surname.as_str())),
        strings(votes.iter().map(|v| v.member.first_name.as_str())),
        strings(votes.iter().map(|v| v.member.honorific.as_str())),
        strings(votes.iter().map(|v| v.member.display_name.as_str())),
        optional_strings(votes.iter().map(|v| v.member.remark.as_deref())),
        strings(votes.iter().map(|v| v.vote.column())),
        dates(votes.iter().map(|v| v.date)),
        strings(votes.iter().map(|v| v.title.as_str())),
        strings(votes.iter().map(|v| v.sheet_name.as_str())),
    ];
    write_table(path, fields, columns)
}

pub fn write_polls(path: &Path, polls: &[Poll]) -> PipelineResult<()> {
    let fields = vec![
        Field::new("poll_id", ArrowType::UInt64, false),
        Field::new("title", ArrowType::Utf8, false),
        Field::new("description", ArrowType::Utf8, false),
        Field::new("first_committee", ArrowType::Utf8, true),
        Field::new("legislature_id", ArrowType::UInt64, false),
        Field::new("legislature_period", ArrowType::Utf8, false),
        Field::new("date", ArrowType::Date32, true),
    ];
    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from(
            polls.iter().map(|p| p.poll_id).collect::<Vec<u64>>(),
        )),
        strings(polls.iter().map(|p| p.title.as_str())),
        strings(polls.iter().map(|p| p.description.as_str())),
        optional_strings(polls.iter().map(|p| p.first_committee.as_deref())),
        Arc::new(UInt64Array::from(
            polls.iter().map(|p| p.legislature_id).collect::<Vec<u64>>(),
        )),
        strings(polls.iter().map(|p| p.legislature_period.as_str())),
        dates(polls.iter().map(|p| p.date)),
    ];
    write_table(path, fields, columns)
}

pub fn write_mandates(path: &Path, mandates: &[Mandate]) -> PipelineResult<()> {
    let mut all_parties = ListBuilder::new(StringBuilder::new());
    for m in mandates.iter() {
        for party in m.all_parties.iter() {
            all_parties.values().append_value(party);
        }
        all_parties.append(true);
    }
    let fields = vec![
        Field::new("mandate_id", ArrowType::UInt64, false),
        Field::new("mandate_label", ArrowType::Utf8, false),
        Field::new("politician_id", ArrowType::UInt64, false),
        Field::new("politician_name", ArrowType::Utf8, false),
        Field::new("politician_url", ArrowType::Utf8, true),
        Field::new("legislature_id", ArrowType::UInt64, false),
        Field::new("legislature_period", ArrowType::Utf8, false),
        Field::new("start_date", ArrowType::Utf8, true),
        Field::new("end_date", ArrowType::Utf8, true),
        Field::new("constituency_id", ArrowType::UInt64, true),
        Field::new("constituency_name", ArrowType::Utf8, true),
        Field::new("party", ArrowType::Utf8, false),
        Field::new(
            "all_parties",
            ArrowType::List(Arc::new(Field::new("item", ArrowType::Utf8, true))),
            false,
        ),
        Field::new("party_ambiguous", ArrowType::Boolean, false),
    ];
    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from(
            mandates.iter().map(|m| m.mandate_id).collect::<Vec<u64>>(),
        )),
        strings(mandates.iter().map(|m| m.mandate_label.as_str())),
        Arc::new(UInt64Array::from(
            mandates.iter().map(|m| m.politician_id).collect::<Vec<u64>>(),
        )),
        strings(mandates.iter().map(|m| m.politician_name.as_str())),
        optional_strings(mandates.iter().map(|m| m.politician_url.as_deref())),
        Arc::new(UInt64Array::from(
            mandates.iter().map(|m| m.legislature_id).collect::<Vec<u64>>(),
        )),
        strings(mandates.iter().map(|m| m.legislature_period.as_str())),
        optional_strings(mandates.iter().map(|m| m.start_date.as_deref())),
        optional_strings(mandates.iter().map(|m| m.end_date.as_deref())),
        Arc::new(UInt64Array::from(
            mandates
                .iter()
                .map(|m| m.constituency_id)
                .collect::<Vec<Option<u64>>>(),
        )),
        optional_strings(mandates.iter().map(|m| m.constituency_name.as_deref())),
        strings(mandates.iter().map(|m| m.party.as_str())),
        Arc::new(all_parties.finish()),
        Arc::new(BooleanArray::from(
            mandates.iter().map(|m| m.party_ambiguous).collect::<Vec<bool>>(),
        )),
    ];
    write_table(path, fields, columns)
}

pub fn write_votes(path: &Path, votes: &[Vote]) -> PipelineResult<()> {
    let fields = vec![
        Field::new("vote_id", ArrowType::UInt64, false),
        Field::new("mandate_id", ArrowType::UInt64, false),
        Field::new("mandate_label", ArrowType::Utf8, false),
        Field::new("poll_id", ArrowType::UInt64, false),
        Field::new("vote", ArrowType::Utf8, false),
        Field::new("reason_no_show", ArrowType::Utf8, true),
        Field::new("reason_no_show_other", ArrowType::Utf8, true),
    ];
    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from(
            votes.iter().map(|v| v.vote_id).collect::<Vec<u64>>(),
        )),
        Arc::new(UInt64Array::from(
            votes.iter().map(|v| v.mandate_id).collect::<Vec<u64>>(),
        )),
        strings(votes.iter().map(|v| v.mandate_label.as_str())),
        Arc::new(UInt64Array::from(
            votes.iter().map(|v| v.poll_id).collect::<Vec<u64>>(),
        )),
        strings(votes.iter().map(|v| v.vote.label())),
        optional_strings(votes.iter().map(|v| v.reason_no_show.as_deref())),
        optional_strings(votes.iter().map(|v| v.reason_no_show_other.as_deref())),
    ];
    write_table(path, fields, columns)
}

pub fn write_normalized(path: &Path, records: &[NormalizedVoteRecord]) -> PipelineResult<()> {
    let fields = vec![
        Field::new("member_or_mandate_id", ArrowType::Utf8, false),
        Field::new("issue_id", ArrowType::Utf8, false),
        Field::new("date", ArrowType::Date32, true),
        Field::new("title", ArrowType::Utf8, false),
        Field::new("party", ArrowType::Utf8, false),
        Field::new("vote", ArrowType::Utf8, false),
        Field::new("source", ArrowType::Utf8, false),
    ];
    let columns: Vec<ArrayRef> = vec![
        strings(records.iter().map(|r| r.member_or_mandate_id.as_str())),
        strings(records.iter().map(|r| r.issue_id.as_str())),
        dates(records.iter().map(|r| r.date)),
        strings(records.iter().map(|r| r.title.as_str())),
        strings(records.iter().map(|r| r.party.as_str())),
        strings(records.iter().map(|r| r.vote.label())),
        strings(records.iter().map(|r| r.source.label())),
    ];
    write_table(path, fields, columns)
}

#[derive(Serialize)]
struct CompiledVoteRow<'a> {
    poll_id: u64,
    vote_id: u64,
    mandate_id: u64,
    mandate_label: &'a str,
    vote: &'a str,
    reason_no_show: Option<&'a str>,
    reason_no_show_other: Option<&'a str>,
}

/// The votes of a legislature as a single csv file.
pub fn write_compiled_csv(path: &Path, votes: &[Vote]) -> PipelineResult<()> {
    let p = path.display().to_string();
    write_with(path, |file| {
        let mut writer = csv::Writer::from_writer(file);
        for v in votes.iter() {
            writer
                .serialize(CompiledVoteRow {
                    poll_id: v.poll_id,
                    vote_id: v.vote_id,
                    mandate_id: v.mandate_id,
                    mandate_label: &v.mandate_label,
                    vote: v.vote.label(),
                    reason_no_show: v.reason_no_show.as_deref(),
                    reason_no_show_other: v.reason_no_show_other.as_deref(),
                })
                .context(CsvSnafu { path: p.clone() })?;
        }
        writer.flush().context(WritingFileSnafu { path: p.clone() })?;
        Ok(())
    })
}
