//! Reading NHGIS extract archives in place, without unpacking them to disk.

use crate::utils::error::{NhgisError, Result};
use regex::Regex;
use shapefile::dbase;
use shapefile::Shape;
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use zip::ZipArchive;

/// Upper bound on the buffer reserved up front for an archive entry. Larger
/// entries still read fully; the header's declared size is only a hint.
const MAX_PREALLOC: usize = 64 << 20;

/// A CSV table read from an extract archive. The first row is the header.
#[derive(Debug, Clone)]
pub struct NhgisTable {
    source: String,
    headers: csv::StringRecord,
    rows: Vec<csv::StringRecord>,
}

impl NhgisTable {
    /// Archive entry the table was read from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn headers(&self) -> Vec<&str> {
        self.headers.iter().collect()
    }

    pub fn rows(&self) -> &[csv::StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).unwrap_or(""))
                .collect(),
        )
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    /// Writes the header and up to `limit` rows as CSV, quoting fields as needed.
    pub fn write_csv<W: Write>(&self, writer: W, limit: usize) -> Result<()> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(&self.headers)?;
        for row in self.rows.iter().take(limit) {
            out.write_record(row)?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Geometry and attributes of every feature in a shapefile.
#[derive(Debug, Clone)]
pub struct ShapeTable {
    pub source: String,
    pub features: Vec<(Shape, dbase::Record)>,
    /// Contents of the `.prj` file, when the bundle has one.
    pub projection: Option<String>,
}

impl ShapeTable {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.features.iter().map(|(shape, _)| shape)
    }

    pub fn records(&self) -> impl Iterator<Item = &dbase::Record> {
        self.features.iter().map(|(_, record)| record)
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    tracing::debug!("Opening archive {}", path.display());
    let file = File::open(path)?;
    Ok(ZipArchive::new(file)?)
}

/// File entries in archive order; directory entries are skipped.
fn entry_names<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if !entry.is_dir() {
            names.push(entry.name().to_string());
        }
    }
    Ok(names)
}

fn filter_names(names: &[String], pattern: &str) -> Result<Vec<String>> {
    let re = Regex::new(pattern)?;
    Ok(names.iter().filter(|n| re.is_match(n)).cloned().collect())
}

fn capacity_hint(declared: u64) -> usize {
    usize::try_from(declared).map_or(MAX_PREALLOC, |size| size.min(MAX_PREALLOC))
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive.by_name(name)?;
    let mut buf = Vec::with_capacity(capacity_hint(entry.size()));
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Lists the files of an archive, optionally keeping only names the regex
/// `pattern` matches anywhere in.
pub fn nhgis_list_files(path: impl AsRef<Path>, pattern: Option<&str>) -> Result<Vec<String>> {
    let mut archive = open_archive(path.as_ref())?;
    let names = entry_names(&mut archive)?;

    let Some(pattern) = pattern else {
        return Ok(names);
    };

    let files = filter_names(&names, pattern)?;
    if files.is_empty() {
        return Err(NhgisError::NoMatchingFiles {
            pattern: pattern.to_string(),
            available: names.join("\n"),
        });
    }
    Ok(files)
}

/// Picks the one entry `file_select` matches. Without a selector the archive
/// itself must hold exactly one file.
pub fn select_single_file(names: &[String], file_select: Option<&str>) -> Result<String> {
    let mut selection = match file_select {
        Some(pattern) => filter_names(names, pattern)?,
        None => names.to_vec(),
    };

    match selection.len() {
        1 => Ok(selection.remove(0)),
        0 => Err(NhgisError::NoMatchingFiles {
            pattern: file_select.unwrap_or_default().to_string(),
            available: names.join("\n"),
        }),
        _ => Err(NhgisError::MultipleFilesSelected {
            available: names.join("\n"),
        }),
    }
}

/// Reads one CSV file straight out of an extract archive.
pub fn read_nhgis(path: impl AsRef<Path>, file_select: Option<&str>) -> Result<NhgisTable> {
    let mut archive = open_archive(path.as_ref())?;
    let names = entry_names(&mut archive)?;
    let selected = select_single_file(&names, file_select)?;

    let entry = archive.by_name(&selected)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(entry);

    let headers = reader.headers()?.clone();
    let rows = reader
        .records()
        .collect::<std::result::Result<Vec<_>, csv::Error>>()?;

    tracing::debug!("Read {} rows from {}", rows.len(), selected);
    Ok(NhgisTable {
        source: selected,
        headers,
        rows,
    })
}

/// Reads a text file, such as a codebook, out of an extract archive.
pub fn read_nhgis_text(path: impl AsRef<Path>, file_select: Option<&str>) -> Result<String> {
    let mut archive = open_archive(path.as_ref())?;
    let names = entry_names(&mut archive)?;
    let selected = select_single_file(&names, file_select)?;

    let bytes = read_entry(&mut archive, &selected)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Reads a shapefile out of an extract archive.
///
/// The selected entry is either a nested `.zip` bundle (NHGIS ships one per
/// geographic level) or a `.shp` file whose `.dbf` sits next to it.
pub fn read_nhgis_shp(path: impl AsRef<Path>, file_select: Option<&str>) -> Result<ShapeTable> {
    let mut archive = open_archive(path.as_ref())?;
    let names = entry_names(&mut archive)?;
    let selected = select_single_file(&names, file_select)?;
    let lower = selected.to_ascii_lowercase();

    if lower.ends_with(".zip") {
        tracing::debug!("Opening nested shapefile bundle {}", selected);
        let bytes = read_entry(&mut archive, &selected)?;
        let mut bundle = ZipArchive::new(Cursor::new(bytes))?;
        let bundle_names = entry_names(&mut bundle)?;
        let shp = select_single_file(&bundle_names, Some(r"(?i)\.shp$"))?;
        read_shapefile(&mut bundle, &bundle_names, &shp)
    } else if lower.ends_with(".shp") {
        read_shapefile(&mut archive, &names, &selected)
    } else {
        Err(NhgisError::ValidationError {
            message: format!("{} is neither a .zip bundle nor a .shp file", selected),
        })
    }
}

fn sibling(names: &[String], stem: &str, extension: &str) -> Option<String> {
    let wanted = format!("{}.{}", stem, extension);
    names.iter().find(|n| n.eq_ignore_ascii_case(&wanted)).cloned()
}

fn read_shapefile<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    names: &[String],
    shp: &str,
) -> Result<ShapeTable> {
    let stem = &shp[..shp.len() - ".shp".len()];
    let dbf = sibling(names, stem, "dbf").ok_or_else(|| NhgisError::NoMatchingFiles {
        pattern: format!("{}.dbf", stem),
        available: names.join("\n"),
    })?;

    let shp_bytes = read_entry(archive, shp)?;
    let dbf_bytes = read_entry(archive, &dbf)?;
    let projection = match sibling(names, stem, "prj") {
        Some(prj) => Some(String::from_utf8_lossy(&read_entry(archive, &prj)?).into_owned()),
        None => None,
    };

    let shape_reader = shapefile::ShapeReader::new(Cursor::new(shp_bytes))?;
    let dbase_reader = dbase::Reader::new(Cursor::new(dbf_bytes))?;
    let mut reader = shapefile::Reader::new(shape_reader, dbase_reader);

    let features = reader
        .iter_shapes_and_records()
        .collect::<std::result::Result<Vec<_>, shapefile::Error>>()?;

    tracing::debug!("Read {} features from {}", features.len(), shp);
    Ok(ShapeTable {
        source: shp.to_string(),
        features,
        projection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_capacity_hint_ignores_oversized_headers() {
        assert_eq!(capacity_hint(0), 0);
        assert_eq!(capacity_hint(4096), 4096);
        assert_eq!(capacity_hint(u64::MAX), MAX_PREALLOC);
        assert_eq!(capacity_hint(u32::MAX as u64), MAX_PREALLOC);
    }

    #[test]
    fn test_write_csv_quotes_fields() {
        let table = NhgisTable {
            source: "tract.csv".to_string(),
            headers: csv::StringRecord::from(vec!["GISJOIN", "NAME"]),
            rows: vec![
                csv::StringRecord::from(vec!["G0100010020100", "Census Tract 201, Autauga County, Alabama"]),
                csv::StringRecord::from(vec!["G0100010020200", "Tract \"202\""]),
                csv::StringRecord::from(vec!["G0100010020300", "Census Tract 203"]),
            ],
        };

        let mut out = Vec::new();
        table.write_csv(&mut out, 2).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "GISJOIN,NAME\n\
             G0100010020100,\"Census Tract 201, Autauga County, Alabama\"\n\
             G0100010020200,\"Tract \"\"202\"\"\"\n"
        );
    }

    #[test]
    fn test_select_single_file_by_pattern() {
        let files = names(&[
            "nhgis0001_csv/nhgis0001_ds248_2020_tract.csv",
            "nhgis0001_csv/nhgis0001_ds248_2020_tract_codebook.txt",
        ]);
        let selected = select_single_file(&files, Some(r"\.csv$")).unwrap();
        assert_eq!(selected, "nhgis0001_csv/nhgis0001_ds248_2020_tract.csv");
    }

    #[test]
    fn test_select_single_file_is_a_search() {
        let files = names(&["a/ds248_tract.csv", "a/ds172_county.csv"]);
        assert_eq!(
            select_single_file(&files, Some("ds172")).unwrap(),
            "a/ds172_county.csv"
        );
    }

    #[test]
    fn test_select_single_file_errors() {
        let files = names(&["a.csv", "b.csv"]);
        assert!(matches!(
            select_single_file(&files, None),
            Err(NhgisError::MultipleFilesSelected { .. })
        ));
        assert!(matches!(
            select_single_file(&files, Some("csv")),
            Err(NhgisError::MultipleFilesSelected { .. })
        ));
        assert!(matches!(
            select_single_file(&files, Some("shp")),
            Err(NhgisError::NoMatchingFiles { .. })
        ));
        assert!(matches!(
            select_single_file(&files, Some("(")),
            Err(NhgisError::PatternError(_))
        ));
    }

    #[test]
    fn test_sibling_lookup_ignores_case() {
        let files = names(&["bundle/US_state.shp", "bundle/US_state.DBF"]);
        assert_eq!(
            sibling(&files, "bundle/US_state", "dbf").as_deref(),
            Some("bundle/US_state.DBF")
        );
        assert_eq!(sibling(&files, "bundle/US_state", "prj"), None);
    }
}
