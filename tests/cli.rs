use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn supp_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("supp");
    path
}

fn run_supp(cwd: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = supp_binary();
    let output = Command::new(&binary)
        .current_dir(cwd)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run supp binary at {:?}: {}", binary, e));
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

const UNSPLIT: &str = r#"{
  "source": "supp-harness",
  "date": "",
  "key": "supp_harness.key",
  "infons": {},
  "documents": [
    {
      "id": "notes.txt",
      "infons": {},
      "passages": [
        {"offset": 0, "infons": {}, "text": "Dr. Smith arrived. He left.", "sentences": [], "annotations": [], "relations": []},
        {"offset": 27, "infons": {}, "text": "E. coli grew.", "sentences": [], "annotations": [], "relations": []}
      ],
      "relations": []
    }
  ]
}"#;

#[test]
fn classify_prints_class_and_mime() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("t.csv"), "a,b\n").unwrap();
    fs::write(tmp.path().join("download"), "%PDF-1.4\n%\u{e2}\n").unwrap();
    let (stdout, stderr, ok) = run_supp(tmp.path(), &["classify", "t.csv", "download"]);
    assert!(ok, "stderr: {}", stderr);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "spreadsheet\t-\tt.csv");
    assert_eq!(lines[1], "pdf\tapplication/pdf\tdownload");
}

#[test]
fn split_writes_sentences_without_touching_input() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in");
    fs::create_dir_all(input.join("PMC1")).unwrap();
    let source = input.join("PMC1").join("notes.txt_bioc.json");
    fs::write(&source, UNSPLIT).unwrap();

    let (stdout, stderr, ok) = run_supp(tmp.path(), &["split", "in", "--output", "out"]);
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("Wrote 1 collections"));
    assert_eq!(fs::read_to_string(&source).unwrap(), UNSPLIT);

    let written = fs::read_to_string(tmp.path().join("out/PMC1/notes.txt_bioc.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&written).unwrap();
    let passages = json["documents"][0]["passages"].as_array().unwrap();
    let first: Vec<&str> = passages[0]["sentences"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["text"].as_str().unwrap())
        .collect();
    assert_eq!(first, vec!["Dr. Smith arrived. ", "He left."]);
    assert_eq!(passages[1]["sentences"][0]["offset"], 27);
    assert_eq!(passages[1]["sentences"].as_array().unwrap().len(), 1);
}

#[test]
fn split_rejects_bad_offsets() {
    let tmp = TempDir::new().unwrap();
    let broken = UNSPLIT.replace("\"offset\": 27", "\"offset\": 30");
    fs::write(tmp.path().join("x_bioc.json"), broken).unwrap();
    let (_, _, ok) = run_supp(tmp.path(), &["split", "x_bioc.json", "-o", "out"]);
    assert!(!ok);
}

#[test]
fn process_then_stats() {
    let tmp = TempDir::new().unwrap();
    let raw = tmp.path().join("set1/PMC5_supplementary/Raw");
    fs::create_dir_all(&raw).unwrap();
    fs::write(raw.join("a.txt"), "Hello there.\n").unwrap();
    fs::write(raw.join("b.csv"), "x,y\n1,2\n").unwrap();
    fs::write(raw.join("c.pdb"), [0u8, 1, 2, 0]).unwrap();

    let (stdout, stderr, ok) = run_supp(tmp.path(), &["process", "set1", "--progress", "off"]);
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("3 files, 2 succeeded, 1 skipped, 0 failed"), "{}", stdout);

    let (stdout, stderr, ok) = run_supp(tmp.path(), &["stats", "set1"]);
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("Articles:    1"));
    assert!(stdout.lines().any(|l| l.trim_start().starts_with("unprocessed") && l.trim_end().ends_with('1')));
    assert!(stdout.lines().any(|l| l.trim_start().starts_with(".pdb")));
}

#[test]
fn walk_lists_members() {
    use std::io::Write;
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("a.zip");
    {
        let mut zip = zip::ZipWriter::new(fs::File::create(&path).unwrap());
        zip.start_file("docs/x.docx", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"not really a docx").unwrap();
        zip.finish().unwrap();
    }
    let (stdout, stderr, ok) = run_supp(tmp.path(), &["walk", "a.zip"]);
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("word\tdocs/x.docx"));
    assert!(stdout.contains("1 members"));
}

#[test]
fn invalid_config_is_reported() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("bad.toml"), "[pipeline]\nmax_pdf_pages = 0\n").unwrap();
    let (_, _, ok) = run_supp(tmp.path(), &["--config", "bad.toml", "classify", "x"]);
    assert!(!ok);
}
