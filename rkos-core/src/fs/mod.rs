mod block;
mod tsb;

pub use block::DiskBlock;
pub use tsb::Tsb;

use core::fmt;

use crate::constants::disk::BLOCK_PAYLOAD;
use crate::constants::SWAP_SENTINEL;
use crate::devices::BlockStore;

use log::{debug, error, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsError {
    Unformatted,
    NotFound,
    NameTooLong,
    Exists,
    NoSpace,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FsError::Unformatted => write!(f, "disk is not formatted"),
            FsError::NotFound => write!(f, "file not found"),
            FsError::NameTooLong => write!(f, "file name is too long"),
            FsError::Exists => write!(f, "file already exists"),
            FsError::NoSpace => write!(f, "no free disk blocks"),
        }
    }
}

/// Block-chain file system over the byte-addressed block store.
/// Track 0 holds directory entries (one file name per block, next
/// pointing at the first content block); the remaining tracks hold
/// chained content blocks.
pub struct FileSystem<'d> {
    store: &'d mut dyn BlockStore,
}

impl<'d> FileSystem<'d> {
    pub fn new(store: &'d mut dyn BlockStore) -> FileSystem<'d> {
        FileSystem { store }
    }

    fn read_block(&self, tsb: Tsb) -> DiskBlock {
        match self.store.get(tsb) {
            Some(bytes) => DiskBlock::from_bytes(&bytes),
            None => DiskBlock::free(),
        }
    }

    fn write_block(&mut self, tsb: Tsb, block: &DiskBlock) {
        self.store.set(tsb, block.to_bytes());
    }

    /// Writes a free block to every valid address, then recreates the
    /// directory sentinel at the first address
    pub fn format(&mut self) {
        for tsb in Tsb::first().walk() {
            self.write_block(tsb, &DiskBlock::free());
        }
        let sentinel = DiskBlock::occupied(None, b"rkos".to_vec());
        self.write_block(Tsb::first(), &sentinel);
        debug!("disk formatted");
    }

    /// Every operation validates against the directory region first
    fn check_formatted(&self) -> Result<(), FsError> {
        if self.read_block(Tsb::first()).occupied {
            Ok(())
        } else {
            Err(FsError::Unformatted)
        }
    }

    /// Directory addresses, the sentinel excluded
    fn directory_addresses() -> impl Iterator<Item = Tsb> {
        Tsb::first()
            .walk()
            .take_while(|tsb| tsb.is_directory())
            .skip(1)
    }

    /// Scans directory blocks for a byte-for-byte name match
    pub fn find_file(&self, name: &str) -> Option<Tsb> {
        Self::directory_addresses().find(|&tsb| self.read_block(tsb).name_matches(name))
    }

    /// First directory block with a free status bit
    pub fn find_free_directory_entry(&self) -> Option<Tsb> {
        Self::directory_addresses().find(|&tsb| !self.read_block(tsb).occupied)
    }

    /// First content block with a free status bit
    pub fn find_free_content_block(&self) -> Option<Tsb> {
        Tsb::first_content()
            .walk()
            .find(|&tsb| !self.read_block(tsb).occupied)
    }

    /// Allocates one directory block naming the file and one content
    /// block for it to chain from
    pub fn create_file(&mut self, name: &str) -> Result<(), FsError> {
        self.check_formatted()?;
        if name.len() > BLOCK_PAYLOAD {
            return Err(FsError::NameTooLong);
        }
        if self.find_file(name).is_some() {
            return Err(FsError::Exists);
        }
        let dir = self.find_free_directory_entry().ok_or(FsError::NoSpace)?;
        let content = self.find_free_content_block().ok_or(FsError::NoSpace)?;

        self.write_block(content, &DiskBlock::occupied(None, Vec::new()));
        self.write_block(
            dir,
            &DiskBlock::occupied(Some(content), name.as_bytes().to_vec()),
        );
        debug!("created file {} at {}", name, dir);
        Ok(())
    }

    /// Writes into the single content block chained from the directory
    /// entry, silently truncating anything past one payload
    pub fn write_file(&mut self, name: &str, data: &[u8]) -> Result<(), FsError> {
        self.check_formatted()?;
        let dir = self.find_file(name).ok_or(FsError::NotFound)?;
        let content = match self.read_block(dir).next {
            Some(tsb) => tsb,
            None => return Err(FsError::NotFound),
        };

        if data.len() > BLOCK_PAYLOAD {
            warn!(
                "write to {} truncated from {} to {} bytes",
                name,
                data.len(),
                BLOCK_PAYLOAD
            );
        }
        let kept = &data[..data.len().min(BLOCK_PAYLOAD)];
        let old_next = self.read_block(content).next;
        self.write_block(content, &DiskBlock::occupied(old_next, kept.to_vec()));
        Ok(())
    }

    /// Concatenated payloads along the block chain, zero padding
    /// trimmed
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>, FsError> {
        let raw = self.read_chain(name)?;
        let end = raw.iter().rposition(|&b| b != 0).map(|i| i + 1).unwrap_or(0);
        Ok(raw[..end].to_vec())
    }

    /// Frees the directory block, then every linked content block
    /// until the terminal address
    pub fn delete_file(&mut self, name: &str) -> Result<(), FsError> {
        self.check_formatted()?;
        let dir = self.find_file(name).ok_or(FsError::NotFound)?;
        let mut cursor = self.read_block(dir).next;
        self.write_block(dir, &DiskBlock::free());

        let mut guard = Tsb::first().walk().count();
        while let Some(tsb) = cursor {
            let block = self.read_block(tsb);
            cursor = block.next;
            self.write_block(tsb, &DiskBlock::free());
            guard -= 1;
            if guard == 0 {
                error!("cyclic block chain while deleting {}", name);
                break;
            }
        }
        debug!("deleted file {}", name);
        Ok(())
    }

    /// Directory listing for the host; swap files stay hidden
    pub fn list_files(&self) -> Result<Vec<String>, FsError> {
        self.check_formatted()?;
        let mut names = Vec::new();
        for tsb in Self::directory_addresses() {
            let block = self.read_block(tsb);
            if !block.occupied {
                continue;
            }
            let name = String::from_utf8_lossy(block.trimmed_payload()).into_owned();
            if !name.starts_with(SWAP_SENTINEL) {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Writes a process image, allocating and chaining as many content
    /// blocks as it needs. Only the memory manager and scheduler come
    /// through here; user writes keep the one-block limitation.
    pub fn write_swap(&mut self, name: &str, data: &[u8]) -> Result<(), FsError> {
        self.check_formatted()?;
        if self.find_file(name).is_none() {
            self.create_file(name)?;
        }
        let dir = self.find_file(name).ok_or(FsError::NotFound)?;
        let mut cursor = match self.read_block(dir).next {
            Some(tsb) => tsb,
            None => return Err(FsError::NotFound),
        };

        let mut chunks: Vec<&[u8]> = data.chunks(BLOCK_PAYLOAD).collect();
        if chunks.is_empty() {
            // An empty image still owns its first content block
            chunks.push(&data[..]);
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let existing = self.read_block(cursor);
            if i + 1 == chunks.len() {
                // Last chunk: terminate here and release any leftover
                // tail from a longer previous image
                self.write_block(cursor, &DiskBlock::occupied(None, chunk.to_vec()));
                self.free_chain(existing.next);
            } else {
                let next = match existing.next {
                    Some(tsb) => tsb,
                    None => {
                        let tsb = self.find_free_content_block().ok_or(FsError::NoSpace)?;
                        // Mark it before the next allocation scan
                        self.write_block(tsb, &DiskBlock::occupied(None, Vec::new()));
                        tsb
                    }
                };
                self.write_block(cursor, &DiskBlock::occupied(Some(next), chunk.to_vec()));
                cursor = next;
            }
        }
        debug!("wrote {} byte swap image to {}", data.len(), name);
        Ok(())
    }

    /// Reads a swap image back, exactly `limit` bytes of it
    pub fn read_swap(&self, name: &str, limit: u16) -> Result<Vec<u8>, FsError> {
        let mut raw = self.read_chain(name)?;
        raw.resize(limit as usize, 0);
        Ok(raw)
    }

    fn read_chain(&self, name: &str) -> Result<Vec<u8>, FsError> {
        self.check_formatted()?;
        let dir = self.find_file(name).ok_or(FsError::NotFound)?;
        let mut cursor = self.read_block(dir).next;
        let mut data = Vec::new();

        let mut guard = Tsb::first().walk().count();
        while let Some(tsb) = cursor {
            let block = self.read_block(tsb);
            data.extend_from_slice(&block.payload);
            cursor = block.next;
            guard -= 1;
            if guard == 0 {
                error!("cyclic block chain while reading {}", name);
                break;
            }
        }
        Ok(data)
    }

    fn free_chain(&mut self, mut cursor: Option<Tsb>) {
        let mut guard = Tsb::first().walk().count();
        while let Some(tsb) = cursor {
            let block = self.read_block(tsb);
            cursor = block.next;
            self.write_block(tsb, &DiskBlock::free());
            guard -= 1;
            if guard == 0 {
                error!("cyclic block chain while freeing tail");
                break;
            }
        }
    }
}
