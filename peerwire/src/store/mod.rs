use std::{
    num::NonZeroUsize,
    path::Path,
    sync::{Arc, Mutex},
};
use tokio::task;
use crate::{bitfield::Bitfield, descriptor::ContentDescriptor};

mod piece;
mod file;

pub use piece::Piece;
use file::StoreFile;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("piece {0} failed hash validation")]
    Validation(usize),

    #[error("piece index {0} out of range")]
    InvalidIndex(usize),

    #[error("sync error: {0}")]
    Sync(String),

    #[error("blocking task failed: {0}")]
    Join(#[from] task::JoinError),

}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        StoreError::Sync(e.to_string())
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

// Reads and writes whole pieces, mapping them onto the torrent's files.
// Cheap to clone, clones share files, bitfield and cache.
#[derive(Debug, Clone)]
pub struct PieceStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {

    descriptor: Arc<ContentDescriptor>,

    // One lock per file, pieces spanning files lock them in order.
    files: Vec<Mutex<StoreFile>>,

    // Pieces verified on disk.
    haves: Mutex<Bitfield>,

    // Peers often request many blocks of the same piece,
    // so whole pieces are kept to avoid repeated reads.
    read_cache: Mutex<lru::LruCache<usize, Arc<Piece>>>,

}

impl PieceStore {

    // Creates the files at their declared lengths, then hash checks every piece.
    pub async fn open(
        descriptor: Arc<ContentDescriptor>,
        dir: &Path,
        cache_size: usize,
    ) -> Result<PieceStore> {

        let root = descriptor.root_dir(dir);
        tracing::info!("opening store at {:?}", root);

        // One blocking task per file.
        let handles: Vec<_> = descriptor.files
            .iter()
            .map(|entry| {
                let path = root.join(&entry.path);
                let len = entry.length;
                task::spawn_blocking(move || StoreFile::create(&path, len))
            })
            .collect();

        let mut files = Vec::with_capacity(handles.len());
        let mut error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(file)) => files.push(Mutex::new(file)),
                Ok(Err(e)) => { error.get_or_insert(e); },
                Err(e) => { error.get_or_insert(e.into()); },
            }
        }
        if let Some(e) = error {
            tracing::error!("failed to open store: {}", e);
            return Err(e);
        }

        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        let store = PieceStore {
            inner: Arc::new(Inner {
                haves: Mutex::new(Bitfield::new(descriptor.num_pieces())),
                descriptor,
                files,
                read_cache: Mutex::new(lru::LruCache::new(cache_size)),
            }),
        };

        let inner = Arc::clone(&store.inner);
        let found = task::spawn_blocking(move || inner.scan()).await??;
        tracing::info!("found {}/{} pieces on disk", found, store.inner.descriptor.num_pieces());

        Ok(store)
    }

    pub fn descriptor(&self) -> &Arc<ContentDescriptor> {
        &self.inner.descriptor
    }

    pub fn bitfield(&self) -> Result<Bitfield> {
        Ok(self.inner.haves.lock()?.clone())
    }

    pub fn has_piece(&self, idx: usize) -> Result<bool> {
        let haves = self.inner.haves.lock()?;
        Ok(idx < haves.len() && haves.get(idx))
    }

    // Bytes of pieces we have.
    pub fn size(&self) -> Result<usize> {
        let haves = self.inner.haves.lock()?;
        Ok(haves.iter_ones().map(|idx| self.inner.descriptor.piece_len(idx)).sum())
    }

    // A zeroed buffer for downloading the piece into.
    pub fn empty_piece(&self, idx: usize) -> Piece {
        let descriptor = &self.inner.descriptor;
        Piece::new(idx, descriptor.piece_len(idx), descriptor.piece_hash(idx))
    }

    pub async fn get_piece(&self, idx: usize) -> Result<Arc<Piece>> {
        self.inner.check_idx(idx)?;

        if let Some(piece) = self.inner.read_cache.lock()?.get(&idx) {
            tracing::trace!("cache hit for piece {}", idx);
            return Ok(Arc::clone(piece));
        }

        let inner = Arc::clone(&self.inner);
        let piece = Arc::new(task::spawn_blocking(move || inner.read_piece(idx)).await??);
        self.inner.read_cache.lock()?.put(idx, Arc::clone(&piece));
        Ok(piece)
    }

    // Verifies and writes a piece, setting its bit once it's on disk.
    pub async fn set_piece(&self, piece: Piece) -> Result<()> {
        self.inner.check_idx(piece.idx)?;
        let idx = piece.idx;

        if piece.len() != self.inner.descriptor.piece_len(idx) || !piece.is_valid() {
            tracing::warn!("piece {} failed hash validation", idx);
            return Err(StoreError::Validation(idx));
        }

        let inner = Arc::clone(&self.inner);
        let piece = task::spawn_blocking(move || {
            inner.write_piece(&piece)?;
            Ok::<_, StoreError>(piece)
        }).await??;

        tracing::trace!("piece {} written", idx);
        self.inner.haves.lock()?.set(idx, true);
        self.inner.read_cache.lock()?.put(idx, Arc::new(piece));
        Ok(())
    }

    // Flushes every file to disk and drops cached pieces.
    pub async fn close(&self) -> Result<()> {
        self.inner.read_cache.lock()?.clear();
        let inner = Arc::clone(&self.inner);
        task::spawn_blocking(move || {
            for file in inner.files.iter() {
                file.lock()?.sync()?;
            }
            Ok::<_, StoreError>(())
        }).await??;
        tracing::info!("store closed");
        Ok(())
    }
}

impl Inner {

    fn check_idx(&self, idx: usize) -> Result<()> {
        if idx >= self.descriptor.num_pieces() {
            return Err(StoreError::InvalidIndex(idx));
        }
        Ok(())
    }

    // Blocking, marks every piece whose data matches its hash.
    fn scan(&self) -> Result<usize> {
        let mut found = 0;
        for idx in 0..self.descriptor.num_pieces() {
            if self.read_piece(idx)?.is_valid() {
                self.haves.lock()?.set(idx, true);
                found += 1;
            }
        }
        Ok(found)
    }

    fn read_piece(&self, idx: usize) -> Result<Piece> {
        let mut piece = Piece::new(idx, self.descriptor.piece_len(idx), self.descriptor.piece_hash(idx));
        for seg in self.descriptor.piece_segments(idx) {
            let buf = &mut piece.data[seg.piece_offset..seg.piece_offset + seg.len];
            self.files[seg.file_idx].lock()?.read_at(seg.file_offset, buf)?;
        }
        Ok(piece)
    }

    fn write_piece(&self, piece: &Piece) -> Result<()> {
        for seg in self.descriptor.piece_segments(piece.idx) {
            let data = &piece.data[seg.piece_offset..seg.piece_offset + seg.len];
            let mut file = self.files[seg.file_idx].lock()?;
            tracing::trace!("writing {} bytes to {:?} at {}", seg.len, file.path(), seg.file_offset);
            file.write_at(seg.file_offset, data)?;
        }
        Ok(())
    }
}
