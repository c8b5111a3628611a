//! Multi-format source documents: PDF and DOCX reports are extracted,
//! chunked, and retrievable like markdown; broken files are skipped.

mod common;

use std::io::Write;
use std::sync::Arc;

use rca_harness_core::models::{document_id_for, DocumentFormat};
use rca_harness_core::store::VectorIndex;

use common::*;

/// Minimal valid PDF showing `phrase`, with a correct xref table so
/// pdf-extract can parse it.
fn minimal_pdf_with_text(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
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

/// Minimal DOCX (ZIP) whose `word/document.xml` holds one paragraph per entry.
fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[tokio::test]
async fn test_docx_report_is_indexed_by_paragraph() {
    let (_tmp, root) = setup_test_env();
    std::fs::write(
        root.join("rcas/incident-51.docx"),
        minimal_docx(&[
            "Incident 51: payment gateway latency",
            "Root cause: TLS handshakes to the gateway were not pooled.",
        ]),
    )
    .unwrap();
    let config = test_config(&root);
    let rt = test_runtime(&config, Arc::new(ScriptedModel::new(GENERAL, &[]))).await;

    let report = rt.indexer.sync().await.unwrap();
    assert_eq!(report.documents_updated, 1, "failures: {:?}", report.failures);

    let docs = rt.index.documents().await.unwrap();
    assert_eq!(docs[0].format, DocumentFormat::Docx);

    let entries = rt
        .index
        .entries(&document_id_for("incident-51.docx"))
        .await
        .unwrap();
    let text: String = entries.iter().map(|e| e.chunk.novel_text()).collect();
    assert!(text.contains("Incident 51: payment gateway latency\n"));
    assert!(text.contains("TLS handshakes"));

    let hits = rt.retrieval.search("payment gateway TLS handshakes").await;
    assert_eq!(hits.hits[0].source_uri, "incident-51.docx");
}

#[tokio::test]
async fn test_pdf_report_is_indexed() {
    let (_tmp, root) = setup_test_env();
    std::fs::write(
        root.join("rcas/incident-60.pdf"),
        minimal_pdf_with_text("queue consumer deadlock"),
    )
    .unwrap();
    let config = test_config(&root);
    let rt = test_runtime(&config, Arc::new(ScriptedModel::new(GENERAL, &[]))).await;

    let report = rt.indexer.sync().await.unwrap();
    assert_eq!(report.documents_updated, 1, "failures: {:?}", report.failures);

    let docs = rt.index.documents().await.unwrap();
    assert_eq!(docs[0].format, DocumentFormat::Pdf);
    let entries = rt
        .index
        .entries(&document_id_for("incident-60.pdf"))
        .await
        .unwrap();
    assert!(entries.iter().any(|e| e.chunk.text.contains("deadlock")));
}

#[tokio::test]
async fn test_corrupt_files_are_skipped_and_reported() {
    let (_tmp, root) = setup_test_env();
    write_rca(&root, "incident-42.md", INCIDENT_42_V1);
    std::fs::write(root.join("rcas/truncated.pdf"), b"%PDF-1.4\ngarbage").unwrap();
    let mut docx = minimal_docx(&["never read"]);
    docx.truncate(docx.len() / 2);
    std::fs::write(root.join("rcas/truncated.docx"), docx).unwrap();
    let config = test_config(&root);
    let rt = test_runtime(&config, Arc::new(ScriptedModel::new(GENERAL, &[]))).await;

    let report = rt.indexer.sync().await.unwrap();
    assert_eq!(report.documents_updated, 1);
    assert_eq!(report.documents_failed, 2);
    let failed: Vec<&str> = report.failures.iter().map(|f| f.uri.as_str()).collect();
    assert_eq!(failed, vec!["truncated.docx", "truncated.pdf"]);

    let docs = rt.index.documents().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].source_uri, "incident-42.md");
}

#[tokio::test]
async fn test_invalid_utf8_text_is_decoded_lossily() {
    let (_tmp, root) = setup_test_env();
    let mut bytes = b"Disk full on node 3 ".to_vec();
    bytes.extend_from_slice(&[0xff, 0xfe]);
    bytes.extend_from_slice(b" after log rotation stalled.\n");
    std::fs::write(root.join("rcas/incident-9.txt"), bytes).unwrap();
    let config = test_config(&root);
    let rt = test_runtime(&config, Arc::new(ScriptedModel::new(GENERAL, &[]))).await;

    let report = rt.indexer.sync().await.unwrap();
    assert_eq!(report.documents_updated, 1);
    let entries = rt
        .index
        .entries(&document_id_for("incident-9.txt"))
        .await
        .unwrap();
    let text: String = entries.iter().map(|e| e.chunk.novel_text()).collect();
    assert!(text.contains('\u{FFFD}'));
    assert!(text.contains("log rotation stalled"));
}
