//! Combined block/capture CSV log
//!
//! One file, UTF-8 with a byte order mark so spreadsheet tools pick the right
//! encoding. Block records come first, then captures, each in store order.
//! Every data field is quoted.

use cg_core::{Artifact, ArtifactKind, BlockRecord, CaptureRecord, ModerationStore};

use crate::ExportError;

const BOM: &str = "\u{FEFF}";

pub const HEADER: [&str; 8] = [
    "유형",
    "스트리머",
    "다시보기 제목/커뮤니티",
    "차단일시",
    "닉네임",
    "UID",
    "댓글내용",
    "URL",
];

pub const BLOCK_ROW: &str = "차단";
pub const CAPTURE_ROW: &str = "캡처수집";

pub fn csv_filename(date: &str) -> String {
    format!("치지직_댓글_차단_캡처_통합로그_{}.csv", date)
}

/// Quote a field, doubling embedded quotes.
fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn push_row(out: &mut String, fields: [&str; 8]) {
    let row: Vec<String> = fields.iter().map(|field| quote(field)).collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

/// Encode block records then captures into the CSV log.
pub fn encode_csv<'a>(
    blocks: impl IntoIterator<Item = &'a BlockRecord>,
    captures: impl IntoIterator<Item = &'a CaptureRecord>,
) -> String {
    let mut out = String::from(BOM);
    out.push_str(&HEADER.join(","));
    out.push('\n');

    for record in blocks {
        push_row(
            &mut out,
            [
                BLOCK_ROW,
                &record.streamer_name,
                &record.title,
                &record.blocked_at,
                &record.display_name,
                &record.author_id,
                &record.comment_text,
                &record.url,
            ],
        );
    }
    for record in captures {
        push_row(
            &mut out,
            [
                CAPTURE_ROW,
                &record.streamer_name,
                &record.title,
                &record.captured_at,
                &record.display_name,
                &record.author_id,
                &record.comment_text,
                &record.page_url,
            ],
        );
    }
    out
}

/// Build the CSV artifact. Refuses when there is nothing to log.
pub fn export_csv(store: &ModerationStore, date: &str) -> Result<Artifact, ExportError> {
    if store.block_record_count() == 0 && store.capture_count() == 0 {
        return Err(ExportError::Empty);
    }
    let text = encode_csv(store.block_records(), store.capture_records());
    log::info!(
        "csv: {} block records, {} captures",
        store.block_record_count(),
        store.capture_count()
    );
    Ok(Artifact::from_bytes(ArtifactKind::Csv, &csv_filename(date), text.into_bytes()))
}
