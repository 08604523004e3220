//! Ingest of binary document formats: PDF and OOXML extraction, skipping of
//! unreadable or oversized files, and stored content types.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn finrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("finrag");
    path
}

/// Minimal PDF with one text run. Offsets in the xref table are computed
/// from the body so the file parses.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 44 >> stream\nBT /F1 12 Tf 100 700 Td (annual nav check) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn zip_of(entries: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn docx_with_text(phrase: &str) -> Vec<u8> {
    zip_of(&[(
        "word/document.xml",
        format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        ),
    )])
}

fn pptx_with_slides(slides: &[&str]) -> Vec<u8> {
    let entries: Vec<(String, String)> = slides
        .iter()
        .enumerate()
        .map(|(i, text)| {
            (
                format!("ppt/slides/slide{}.xml", i + 1),
                format!(
                    "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
                    text
                ),
            )
        })
        .collect();
    let refs: Vec<(&str, String)> = entries
        .iter()
        .map(|(n, b)| (n.as_str(), b.clone()))
        .collect();
    zip_of(&refs)
}

fn xlsx_holdings() -> Vec<u8> {
    zip_of(&[
        (
            "xl/sharedStrings.xml",
            "<sst><si><t>Holding</t></si><si><t>Weight</t></si><si><t>Infosys</t></si></sst>"
                .to_string(),
        ),
        (
            "xl/worksheets/sheet1.xml",
            "<worksheet><sheetData>\
             <row><c t=\"s\"><v>0</v></c><c t=\"s\"><v>1</v></c></row>\
             <row><c t=\"s\"><v>2</v></c><c><v>8.25</v></c></row>\
             </sheetData></worksheet>"
                .to_string(),
        ),
    ])
}

fn setup_env(extra_globs: &[&str], max_extract_bytes: u64) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    let docs = root.join("PDFs");
    fs::create_dir_all(&docs).unwrap();

    let globs = ["**/*.md"]
        .iter()
        .chain(extra_globs)
        .map(|g| format!("\"{}\"", g))
        .collect::<Vec<_>>()
        .join(", ");

    let config_content = format!(
        r#"[db]
path = "{root}/data/finrag.sqlite"

[documents]
root = "{root}/PDFs"
include_globs = [{globs}]
max_extract_bytes = {max_extract_bytes}
auto_ingest = false
"#,
        root = root.display(),
    );
    let config_path = root.join("config").join("finrag.toml");
    fs::write(&config_path, config_content).unwrap();

    fs::write(docs.join("readme.md"), "# Readme\n\nPlain text file for tests.\n").unwrap();

    (tmp, config_path)
}

fn run_finrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(finrag_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run finrag: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn first_id(search_out: &str) -> Option<String> {
    search_out
        .lines()
        .find(|l| l.trim().starts_with("id:"))
        .and_then(|l| l.split("id:").nth(1))
        .map(|s| s.trim().to_string())
}

#[test]
fn docx_is_extracted_searchable_and_typed() {
    let (tmp, config_path) = setup_env(&["**/*.docx"], 50 * 1024 * 1024);
    fs::write(
        tmp.path().join("PDFs").join("factsheet.docx"),
        docx_with_text("portfolio rebalancing schedule"),
    )
    .unwrap();

    run_finrag(&config_path, &["init"]);
    let (stdout, stderr, success) = run_finrag(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("upserted documents: 2"), "{}", stdout);

    let (search_out, _, success) = run_finrag(&config_path, &["search", "rebalancing"]);
    assert!(success);
    assert!(search_out.contains("factsheet.docx"), "{}", search_out);

    let id = first_id(&search_out).expect("search should return an id");
    let (get_out, _, _) = run_finrag(&config_path, &["get", &id]);
    assert!(
        get_out.contains("wordprocessingml.document"),
        "stored content type should be docx, got: {}",
        get_out
    );
    assert!(get_out.contains("portfolio rebalancing schedule"));
}

#[test]
fn pptx_and_xlsx_are_extracted() {
    let (tmp, config_path) = setup_env(&["**/*.pptx", "**/*.xlsx"], 50 * 1024 * 1024);
    let docs = tmp.path().join("PDFs");
    fs::write(
        docs.join("review.pptx"),
        pptx_with_slides(&["Quarterly review", "Alpha generation outlook"]),
    )
    .unwrap();
    fs::write(docs.join("holdings.xlsx"), xlsx_holdings()).unwrap();

    run_finrag(&config_path, &["init"]);
    let (stdout, stderr, success) = run_finrag(&config_path, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("upserted documents: 3"), "{}", stdout);
    assert!(stdout.contains("extraction skipped: 0"), "{}", stdout);

    let (search_out, _, _) = run_finrag(&config_path, &["search", "outlook"]);
    assert!(search_out.contains("review.pptx"), "{}", search_out);

    let (search_out, _, _) = run_finrag(&config_path, &["search", "Infosys"]);
    assert!(search_out.contains("holdings.xlsx"), "{}", search_out);
    let id = first_id(&search_out).unwrap();
    let (get_out, _, _) = run_finrag(&config_path, &["get", &id]);
    assert!(get_out.contains("Infosys\t8.25"), "{}", get_out);
}

#[test]
fn reingest_full_is_idempotent() {
    let (tmp, config_path) = setup_env(&["**/*.pdf"], 50 * 1024 * 1024);
    fs::write(
        tmp.path().join("PDFs").join("annual.pdf"),
        minimal_pdf_with_phrase(),
    )
    .unwrap();

    run_finrag(&config_path, &["init"]);
    let (stdout1, _, _) = run_finrag(&config_path, &["ingest", "--full"]);
    let (stdout2, _, _) = run_finrag(&config_path, &["ingest", "--full"]);
    let upserted = |s: &str| {
        s.lines()
            .find(|l| l.contains("upserted documents:"))
            .map(str::to_string)
    };
    assert!(upserted(&stdout1).is_some(), "{}", stdout1);
    assert_eq!(upserted(&stdout1), upserted(&stdout2));

    let (stats, _, _) = run_finrag(&config_path, &["stats"]);
    let docs_line = stats.lines().find(|l| l.contains("Documents:")).unwrap();
    assert!(
        docs_line.ends_with(" 1") || docs_line.ends_with(" 2"),
        "re-ingest must not duplicate: {}",
        stats
    );
}

#[test]
fn corrupt_pdf_is_skipped() {
    let (tmp, config_path) = setup_env(&["**/*.pdf"], 50 * 1024 * 1024);
    let docs = tmp.path().join("PDFs");
    fs::write(docs.join("bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(docs.join("good.md"), "# Good\n\nThis is good.\n").unwrap();

    run_finrag(&config_path, &["init"]);
    let (stdout, stderr, success) = run_finrag(&config_path, &["ingest"]);
    assert!(success, "ingest must succeed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("extraction skipped: 1"), "{}", stdout);
    assert!(
        stdout.contains("upserted documents: 2"),
        "good.md and readme.md should be ingested: {}",
        stdout
    );
}

#[test]
fn oversized_file_is_skipped() {
    let (tmp, config_path) = setup_env(&["**/*.pdf"], 1000);
    let docs = tmp.path().join("PDFs");
    fs::write(docs.join("big.pdf"), vec![0u8; 2000]).unwrap();
    fs::write(docs.join("small.md"), "# Small\n\nOk.\n").unwrap();

    run_finrag(&config_path, &["init"]);
    let (stdout, _, success) = run_finrag(&config_path, &["ingest"]);
    assert!(success, "ingest must succeed");
    assert!(stdout.contains("extraction skipped: 1"), "{}", stdout);
    assert!(stdout.contains("upserted documents: 2"), "{}", stdout);
}

#[test]
fn dry_run_counts_skips_without_writing() {
    let (tmp, config_path) = setup_env(&["**/*.pdf"], 50 * 1024 * 1024);
    fs::write(tmp.path().join("PDFs").join("bad.pdf"), b"not a valid pdf either").unwrap();

    run_finrag(&config_path, &["init"]);
    let (stdout, _, success) = run_finrag(&config_path, &["ingest", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("items found: 2"), "{}", stdout);
    assert!(stdout.contains("extraction skipped: 1"), "{}", stdout);
}
