use nhgis_client::{nhgis_list_files, read_nhgis, read_nhgis_shp, read_nhgis_text, NhgisError};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const TRACT_CSV: &str = "GISJOIN,YEAR,STATE,COUNTY,U7H001\n\
G0100010020100,2020,Alabama,Autauga County,1775\n\
G0100010020200,2020,Alabama,Autauga County,2055\n\
G0100010020300,2020,Alabama,Autauga County,3216\n";

const CODEBOOK: &str = "Data Summary\n--------------------------------\nTable 1:     Total Population\nUniverse:    Total population\nSource code: P1\n";

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    for (name, data) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
    }

    zip.finish().unwrap();
}

fn table_archive(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("nhgis0001_csv.zip");
    write_zip(
        &path,
        &[
            ("nhgis0001_csv/", &b""[..]),
            (
                "nhgis0001_csv/nhgis0001_ds258_2020_tract.csv",
                TRACT_CSV.as_bytes(),
            ),
            (
                "nhgis0001_csv/nhgis0001_ds258_2020_tract_codebook.txt",
                CODEBOOK.as_bytes(),
            ),
        ],
    );
    path
}

#[test]
fn test_list_files_in_archive_order() {
    let dir = TempDir::new().unwrap();
    let archive = table_archive(&dir);

    let files = nhgis_list_files(&archive, None).unwrap();

    assert_eq!(
        files,
        vec![
            "nhgis0001_csv/nhgis0001_ds258_2020_tract.csv",
            "nhgis0001_csv/nhgis0001_ds258_2020_tract_codebook.txt",
        ]
    );
}

#[test]
fn test_list_files_with_pattern() {
    let dir = TempDir::new().unwrap();
    let archive = table_archive(&dir);

    let files = nhgis_list_files(&archive, Some(r"\.txt$")).unwrap();
    assert_eq!(
        files,
        vec!["nhgis0001_csv/nhgis0001_ds258_2020_tract_codebook.txt"]
    );

    let both = nhgis_list_files(&archive, Some("ds258")).unwrap();
    assert_eq!(both.len(), 2);
}

#[test]
fn test_list_files_without_match_reports_available_files() {
    let dir = TempDir::new().unwrap();
    let archive = table_archive(&dir);

    let err = nhgis_list_files(&archive, Some("county")).unwrap_err();

    match err {
        NhgisError::NoMatchingFiles { pattern, available } => {
            assert_eq!(pattern, "county");
            assert!(available.contains("nhgis0001_ds258_2020_tract.csv"));
            assert!(available.contains("nhgis0001_ds258_2020_tract_codebook.txt"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_read_csv_from_archive() {
    let dir = TempDir::new().unwrap();
    let archive = table_archive(&dir);

    let table = read_nhgis(&archive, Some(r"\.csv$")).unwrap();

    assert_eq!(table.source(), "nhgis0001_csv/nhgis0001_ds258_2020_tract.csv");
    assert_eq!(
        table.headers(),
        vec!["GISJOIN", "YEAR", "STATE", "COUNTY", "U7H001"]
    );
    assert_eq!(table.len(), 3);
    assert_eq!(
        table.column("U7H001").unwrap(),
        vec!["1775", "2055", "3216"]
    );
    assert_eq!(table.get(1, "GISJOIN"), Some("G0100010020200"));
    assert!(table.column("U7H002").is_none());
}

#[test]
fn test_read_csv_requires_single_selection() {
    let dir = TempDir::new().unwrap();
    let archive = table_archive(&dir);

    assert!(matches!(
        read_nhgis(&archive, None),
        Err(NhgisError::MultipleFilesSelected { .. })
    ));
    assert!(matches!(
        read_nhgis(&archive, Some("tract")),
        Err(NhgisError::MultipleFilesSelected { .. })
    ));
    assert!(matches!(
        read_nhgis(&archive, Some("ds172")),
        Err(NhgisError::NoMatchingFiles { .. })
    ));
}

#[test]
fn test_single_file_archive_needs_no_selector() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("single.zip");
    write_zip(&path, &[("only.csv", &b"a,b\n1,2\n"[..])]);

    let table = read_nhgis(&path, None).unwrap();
    assert_eq!(table.headers(), vec!["a", "b"]);
    assert_eq!(table.get(0, "b"), Some("2"));
}

#[test]
fn test_read_codebook_text() {
    let dir = TempDir::new().unwrap();
    let archive = table_archive(&dir);

    let codebook = read_nhgis_text(&archive, Some("codebook")).unwrap();
    assert_eq!(codebook, CODEBOOK);
}

#[test]
fn test_read_shp_rejects_other_files() {
    let dir = TempDir::new().unwrap();
    let archive = table_archive(&dir);

    let err = read_nhgis_shp(&archive, Some(r"\.csv$")).unwrap_err();
    assert!(matches!(err, NhgisError::ValidationError { .. }));
}

#[test]
fn test_missing_archive_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let err = nhgis_list_files(dir.path().join("missing.zip"), None).unwrap_err();
    assert!(matches!(err, NhgisError::IoError(_)));
}

#[test]
fn test_corrupt_archive_is_a_zip_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.zip");
    std::fs::write(&path, b"this is not a zip archive").unwrap();

    let err = read_nhgis(&path, None).unwrap_err();
    assert!(matches!(err, NhgisError::ZipError(_)));
}
