use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use dicom_core::value::Value;
use dicom_dictionary_std::tags;
use dicom_object::{open_file, InMemDicomObject};
use log::{info, warn};
use rayon::prelude::*;
use walkdir::WalkDir;

/// Collect every distinct element value appearing in any DICOM file under
/// `root`, descending into sequence items recursively. Pixel data is skipped
/// at every nesting level. Useful for eyeballing a batch for stray PHI before
/// and after de-identification.
pub fn unique_values(root: &Path) -> BTreeSet<String> {
    let files: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    info!("reading values from {} files", files.len());

    files
        .par_iter()
        .map(|path| {
            let mut values = BTreeSet::new();
            match open_file(path) {
                Ok(obj) => collect_object(&obj, &mut values),
                Err(err) => warn!("skipping non-DICOM file {}: {}", path.display(), err),
            }
            values
        })
        .reduce(BTreeSet::new, |mut acc, set| {
            acc.extend(set);
            acc
        })
}

/// Collect values and write them to `output`, one per line, sorted.
pub fn dump_unique_values(root: &Path, output: &Path) -> io::Result<()> {
    let values = unique_values(root);
    let mut writer = BufWriter::new(File::create(output)?);
    for value in &values {
        writeln!(writer, "{value}")?;
    }
    info!("wrote {} distinct values to {}", values.len(), output.display());
    Ok(())
}

// Elements are either scalar, a sequence of nested datasets, or encapsulated
// pixel fragments; only the first two contribute values, and sequences are
// walked as a tree.
fn collect_object(obj: &InMemDicomObject, values: &mut BTreeSet<String>) {
    for elem in obj.iter() {
        if elem.header().tag == tags::PIXEL_DATA {
            continue;
        }
        match elem.value() {
            Value::Primitive(primitive) => {
                let text = primitive.to_str();
                if !text.is_empty() {
                    values.insert(text.into_owned());
                }
            }
            Value::Sequence(seq) => {
                for item in seq.items() {
                    collect_object(item, values);
                }
            }
            Value::PixelSequence(_) => {}
        }
    }
}
