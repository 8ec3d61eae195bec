//! Tabular export of a tracks model.
//!
//! Pure serialization: one row per node with time, position, the node's
//! stable id, its parent id (empty for lineage roots) and its track id, plus
//! the segmentation label when a volume is attached. Carries no editing
//! semantics.

use crate::graph::Tracks;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes `t,[z,]y,x,id,parent_id,track_id[,seg_id]` rows.
///
/// The z column is included only for 3-dimensional data. Rows are ordered by
/// (time, node id) so repeated exports of the same model are identical.
pub fn write_tracks<W: Write>(tracks: &Tracks, mut out: W) -> Result<(), ExportError> {
    let ndim = tracks.ndim();
    let with_seg = tracks.segmentation().is_some();

    let mut header: Vec<&str> = vec!["t"];
    if ndim == 3 {
        header.push("z");
    }
    header.extend(["y", "x", "id", "parent_id", "track_id"]);
    if with_seg {
        header.push("seg_id");
    }
    writeln!(out, "{}", header.join(","))?;

    let forest = tracks.forest();
    let mut rows: Vec<_> = forest.node_ids().collect();
    rows.sort_unstable_by_key(|&id| {
        let time = forest.time(id).unwrap_or_default();
        (time, id)
    });

    for id in rows {
        let Ok(attrs) = forest.attrs(id) else {
            continue;
        };
        let mut row = vec![attrs.time.to_string()];
        row.extend(attrs.position.iter().map(f64::to_string));
        row.push(id.to_string());
        row.push(
            forest
                .parent(id)
                .map(|parent| parent.to_string())
                .unwrap_or_default(),
        );
        row.push(attrs.track_id.to_string());
        if with_seg {
            row.push(
                attrs
                    .seg_id
                    .map(|label| label.to_string())
                    .unwrap_or_default(),
            );
        }
        writeln!(out, "{}", row.join(","))?;
    }
    Ok(())
}

/// Writes the export to a file at `path`.
pub fn write_tracks_csv(tracks: &Tracks, path: &Path) -> Result<(), ExportError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_tracks(tracks, &mut writer)?;
    writer.flush()?;
    Ok(())
}
