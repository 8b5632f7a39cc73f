use nhgis_client::{read_nhgis_shp, NhgisError};
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Shape};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const PRJ: &str = "GEOGCS[\"GCS_North_American_1983\"]";

/// Writes a two-point shapefile and returns the bytes of its .shp, .shx and .dbf files.
fn sample_shapefile(dir: &Path) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let shp_path = dir.join("US_state_2020.shp");
    let table = TableWriterBuilder::new()
        .add_character_field(FieldName::try_from("GISJOIN").unwrap(), 20)
        .add_character_field(FieldName::try_from("NAME").unwrap(), 50);
    let mut writer = shapefile::Writer::from_path(&shp_path, table).unwrap();

    for (x, y, gisjoin, name) in [
        (-86.8, 32.8, "G010", "Alabama"),
        (-152.3, 64.7, "G020", "Alaska"),
    ] {
        let mut record = Record::default();
        record.insert(
            "GISJOIN".to_string(),
            FieldValue::Character(Some(gisjoin.to_string())),
        );
        record.insert(
            "NAME".to_string(),
            FieldValue::Character(Some(name.to_string())),
        );
        writer
            .write_shape_and_record(&Point::new(x, y), &record)
            .unwrap();
    }
    drop(writer);

    (
        std::fs::read(&shp_path).unwrap(),
        std::fs::read(dir.join("US_state_2020.shx")).unwrap(),
        std::fs::read(dir.join("US_state_2020.dbf")).unwrap(),
    )
}

fn zip_entries<W: Write + std::io::Seek>(writer: W, entries: &[(&str, &[u8])]) -> W {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap()
}

/// GIS archive laid out the way NHGIS ships it: one inner zip per shapefile.
fn nested_gis_archive(dir: &TempDir) -> PathBuf {
    let (shp, shx, dbf) = sample_shapefile(dir.path());
    let inner = zip_entries(
        Cursor::new(Vec::new()),
        &[
            ("US_state_2020.shp", shp.as_slice()),
            ("US_state_2020.shx", shx.as_slice()),
            ("US_state_2020.dbf", dbf.as_slice()),
            ("US_state_2020.prj", PRJ.as_bytes()),
        ],
    )
    .into_inner();

    let path = dir.path().join("nhgis0001_shape.zip");
    zip_entries(
        std::fs::File::create(&path).unwrap(),
        &[
            (
                "nhgis0001_shape/nhgis0001_shapefile_tl2020_us_state_2020.zip",
                inner.as_slice(),
            ),
            (
                "nhgis0001_shape/nhgis0001_shapefile_tl2020_us_county_2020.zip",
                inner.as_slice(),
            ),
        ],
    );
    path
}

fn text_field(record: &Record, name: &str) -> String {
    match record.get(name) {
        Some(FieldValue::Character(Some(value))) => value.trim().to_string(),
        other => panic!("unexpected {name} value: {other:?}"),
    }
}

#[test]
fn test_read_nested_shapefile_bundle() {
    let dir = TempDir::new().unwrap();
    let archive = nested_gis_archive(&dir);

    let table = read_nhgis_shp(&archive, Some("us_state")).unwrap();

    assert_eq!(table.source, "US_state_2020.shp");
    assert_eq!(table.len(), 2);
    assert_eq!(table.projection.as_deref(), Some(PRJ));

    let names: Vec<String> = table.records().map(|r| text_field(r, "NAME")).collect();
    assert_eq!(names, vec!["Alabama", "Alaska"]);

    match table.shapes().next().unwrap() {
        Shape::Point(point) => {
            assert_eq!(point.x, -86.8);
            assert_eq!(point.y, 32.8);
        }
        other => panic!("unexpected shape: {other:?}"),
    }
}

#[test]
fn test_read_unpacked_shapefile_members() {
    let dir = TempDir::new().unwrap();
    let (shp, shx, dbf) = sample_shapefile(dir.path());
    let path = dir.path().join("loose.zip");
    zip_entries(
        std::fs::File::create(&path).unwrap(),
        &[
            ("shape/US_state_2020.shp", shp.as_slice()),
            ("shape/US_state_2020.shx", shx.as_slice()),
            ("shape/US_state_2020.dbf", dbf.as_slice()),
        ],
    );

    let table = read_nhgis_shp(&path, Some(r"\.shp$")).unwrap();

    assert_eq!(table.source, "shape/US_state_2020.shp");
    assert!(table.projection.is_none());
    let codes: Vec<String> = table.records().map(|r| text_field(r, "GISJOIN")).collect();
    assert_eq!(codes, vec!["G010", "G020"]);
}

#[test]
fn test_shapefile_bundle_selection_must_be_unique() {
    let dir = TempDir::new().unwrap();
    let archive = nested_gis_archive(&dir);

    assert!(matches!(
        read_nhgis_shp(&archive, Some("tl2020")),
        Err(NhgisError::MultipleFilesSelected { .. })
    ));
}

#[test]
fn test_shapefile_without_dbf() {
    let dir = TempDir::new().unwrap();
    let (shp, _, _) = sample_shapefile(dir.path());
    let path = dir.path().join("geometry_only.zip");
    zip_entries(
        std::fs::File::create(&path).unwrap(),
        &[("US_state_2020.shp", shp.as_slice())],
    );

    let err = read_nhgis_shp(&path, None).unwrap_err();
    assert!(matches!(err, NhgisError::NoMatchingFiles { pattern, .. } if pattern == "US_state_2020.dbf"));
}
