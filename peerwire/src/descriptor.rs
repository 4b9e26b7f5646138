use std::{ops::Range, path::{Path, PathBuf}};
use serde_derive::{Deserialize, Serialize};
use crate::ID;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileEntry {

    // Path relative to the torrent's root directory.
    pub path: PathBuf,

    // Length of the file in bytes.
    pub length: usize,

    // Offset in bytes from start of torrent when viewed as single array.
    pub offset: usize,

}

impl FileEntry {
    // Byte index range for whole torrent.
    pub fn byte_range(&self) -> Range<usize> {
        self.offset..(self.offset + self.length)
    }
}

// Part of a piece that lives in a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSegment {

    pub file_idx: usize,

    // Offset of the segment within the file.
    pub file_offset: usize,

    // Offset of the segment within the piece.
    pub piece_offset: usize,

    pub len: usize,

}

// Parsed, immutable description of a torrent's content.
// Produced by an external loader, the core never parses the raw format.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContentDescriptor {

    pub info_hash: ID,

    pub name: String,

    // Length of torrent in bytes.
    pub total_len: usize,

    // Length of every piece but the last.
    pub piece_len: usize,

    pub piece_hashes: Vec<[u8; 20]>,

    pub files: Vec<FileEntry>,

}

impl ContentDescriptor {

    // Builds a descriptor from (path, length) pairs, computing file offsets.
    pub fn new(
        info_hash: ID,
        name: impl Into<String>,
        piece_len: usize,
        piece_hashes: Vec<[u8; 20]>,
        files: Vec<(PathBuf, usize)>,
    ) -> Self {
        debug_assert!(piece_len > 0, "piece length must be non-zero");
        let mut offset = 0;
        let files = files
            .into_iter()
            .map(|(path, length)| {
                let file = FileEntry { path, length, offset };
                offset += length;
                file
            })
            .collect();

        Self {
            info_hash,
            name: name.into(),
            total_len: offset,
            piece_len,
            piece_hashes,
            files,
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    pub fn is_multi_file(&self) -> bool {
        self.files.len() > 1
    }

    // Returns length of piece given its index.
    pub fn piece_len(&self, idx: usize) -> usize {
        debug_assert!(idx < self.num_pieces(), "piece index out of bounds");
        if idx + 1 == self.num_pieces() {
            self.total_len - self.piece_len * idx
        } else {
            self.piece_len
        }
    }

    pub fn piece_hash(&self, idx: usize) -> [u8; 20] {
        self.piece_hashes[idx]
    }

    // Directory the files are stored under. Multi-file torrents get their own sub-directory.
    pub fn root_dir(&self, dir: &Path) -> PathBuf {
        if self.is_multi_file() {
            dir.join(&self.name)
        } else {
            dir.to_path_buf()
        }
    }

    // Maps a piece onto the file regions it covers, in order.
    pub fn piece_segments(&self, idx: usize) -> Vec<FileSegment> {
        let start = idx * self.piece_len;
        let end = start + self.piece_len(idx);

        self.files
            .iter()
            .enumerate()
            .filter(|(_, file)| file.length > 0)
            .filter_map(|(file_idx, file)| {
                let range = file.byte_range();
                let seg_start = start.max(range.start);
                let seg_end = end.min(range.end);
                (seg_start < seg_end).then(|| FileSegment {
                    file_idx,
                    file_offset: seg_start - range.start,
                    piece_offset: seg_start - start,
                    len: seg_end - seg_start,
                })
            })
            .collect()
    }
}
