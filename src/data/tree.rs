//! Event trees stored as Parquet: one row per event, list-valued branches.

use crate::error::{Error, Result};
use arrow::array::{
    Array, ArrayRef, Float32Array, Float32Builder, Float64Array, Int32Array, Int64Array,
    LargeListArray, ListArray, ListBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use num_traits::AsPrimitive;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source of image events for one class.
#[derive(Debug, Clone)]
pub enum ImageTree {
    /// Parquet file, read when the branch is requested.
    File(PathBuf),
    /// Already materialized rows.
    Memory { name: String, rows: Vec<Vec<f32>> },
}

impl ImageTree {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn in_memory(name: impl Into<String>, rows: Vec<Vec<f32>>) -> Self {
        Self::Memory {
            name: name.into(),
            rows,
        }
    }

    pub fn name(&self) -> String {
        match self {
            ImageTree::File(path) => path.display().to_string(),
            ImageTree::Memory { name, .. } => name.clone(),
        }
    }

    /// Every row of `branch`, converted to `f32`.
    pub fn read(&self, branch: &str) -> Result<Vec<Vec<f32>>> {
        match self {
            ImageTree::File(path) => read_list_branch(path, branch),
            ImageTree::Memory { rows, .. } => Ok(rows.clone()),
        }
    }
}

/// Reads a list-valued branch of a Parquet tree, one `Vec` per row.
///
/// Inner values may be `Float32`, `Float64`, `Int32` or `Int64`.
pub fn read_list_branch<T>(path: &Path, branch: &str) -> Result<Vec<Vec<T>>>
where
    T: Copy + Default + 'static,
    f32: AsPrimitive<T>,
    f64: AsPrimitive<T>,
    i32: AsPrimitive<T>,
    i64: AsPrimitive<T>,
{
    let file = std::fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let idx = batch
            .schema()
            .index_of(branch)
            .map_err(|_| Error::MissingBranch {
                path: path.to_path_buf(),
                branch: branch.to_string(),
            })?;
        let col = batch.column(idx);
        for row in 0..batch.num_rows() {
            if col.is_null(row) {
                return Err(Error::NullRow {
                    branch: branch.to_string(),
                    row: rows.len(),
                });
            }
            let values = list_value(col, branch, row)?;
            rows.push(convert_values(&values, branch)?);
        }
    }
    log::debug!("Read {} rows of '{branch}' from {path:?}", rows.len());
    Ok(rows)
}

fn list_value(col: &ArrayRef, branch: &str, row: usize) -> Result<ArrayRef> {
    let unsupported = || Error::BranchType {
        branch: branch.to_string(),
        found: format!("{:?}", col.data_type()),
    };
    match col.data_type() {
        DataType::List(_) => col
            .as_any()
            .downcast_ref::<ListArray>()
            .map(|list| list.value(row))
            .ok_or_else(unsupported),
        DataType::LargeList(_) => col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .map(|list| list.value(row))
            .ok_or_else(unsupported),
        _ => Err(unsupported()),
    }
}

fn convert_values<T>(values: &ArrayRef, branch: &str) -> Result<Vec<T>>
where
    T: Copy + Default + 'static,
    f32: AsPrimitive<T>,
    f64: AsPrimitive<T>,
    i32: AsPrimitive<T>,
    i64: AsPrimitive<T>,
{
    // null entries are empty pixels
    let any = values.as_any();
    if let Some(arr) = any.downcast_ref::<Float32Array>() {
        Ok(arr.iter().map(|v| v.map(|v| v.as_()).unwrap_or_default()).collect())
    } else if let Some(arr) = any.downcast_ref::<Float64Array>() {
        Ok(arr.iter().map(|v| v.map(|v| v.as_()).unwrap_or_default()).collect())
    } else if let Some(arr) = any.downcast_ref::<Int32Array>() {
        Ok(arr.iter().map(|v| v.map(|v| v.as_()).unwrap_or_default()).collect())
    } else if let Some(arr) = any.downcast_ref::<Int64Array>() {
        Ok(arr.iter().map(|v| v.map(|v| v.as_()).unwrap_or_default()).collect())
    } else {
        Err(Error::BranchType {
            branch: branch.to_string(),
            found: format!("list of {:?}", values.data_type()),
        })
    }
}

/// Writes `rows` as a Parquet tree with a single `List<Float32>` branch,
/// replacing any existing file.
pub fn write_image_tree(path: &Path, branch: &str, rows: &[Vec<f32>]) -> Result<()> {
    let mut builder = ListBuilder::new(Float32Builder::new());
    for row in rows {
        builder.values().append_slice(row);
        builder.append(true);
    }
    let array = builder.finish();

    let schema = Arc::new(Schema::new(vec![Field::new(
        branch,
        DataType::List(Arc::new(Field::new("item", DataType::Float32, true))),
        false,
    )]));
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(array)])?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    log::debug!("Wrote {} rows of '{branch}' to {path:?}", rows.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_rows_read_back() {
        let tmp = temp_dir::TempDir::new().unwrap();
        let path = tmp.path().join("sig.parquet");
        let rows = vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]];
        write_image_tree(&path, "vars", &rows).unwrap();

        let tree = ImageTree::file(&path);
        assert_eq!(rows, tree.read("vars").unwrap());

        let as_ints: Vec<Vec<i64>> = read_list_branch(&path, "vars").unwrap();
        assert_eq!(vec![vec![0, 1, 2], vec![3, 4, 5]], as_ints);
    }

    #[test]
    fn missing_branch_is_reported() {
        let tmp = temp_dir::TempDir::new().unwrap();
        let path = tmp.path().join("bkg.parquet");
        write_image_tree(&path, "vars", &[vec![1.0]]).unwrap();

        match ImageTree::file(&path).read("pixels") {
            Err(Error::MissingBranch { branch, .. }) => assert_eq!("pixels", branch),
            other => panic!("expected MissingBranch, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let tmp = temp_dir::TempDir::new().unwrap();
        let tree = ImageTree::file(tmp.path().join("nope.parquet"));
        assert!(matches!(tree.read("vars"), Err(Error::Io(_))));
    }
}
