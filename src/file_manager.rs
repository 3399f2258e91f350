use std::{
    collections::HashMap,
    fmt::Display,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, Write},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::page::Page;

/// The block id container that contains a specific block number for a specific file
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct BlockId {
    pub filename: String,
    pub block_num: usize,
}

impl BlockId {
    pub fn new(filename: impl Into<String>, block_num: usize) -> Self {
        Self {
            filename: filename.into(),
            block_num,
        }
    }

    /// A block that never exists on disk and stands for the end of `filename`.
    /// Locking it serializes readers of a file's size against appenders.
    pub fn end_of_file(filename: impl Into<String>) -> Self {
        Self::new(filename, usize::MAX)
    }

    pub fn is_end_of_file(&self) -> bool {
        self.block_num == usize::MAX
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_end_of_file() {
            write!(f, "[file {}, eof]", self.filename)
        } else {
            write!(f, "[file {}, block {}]", self.filename, self.block_num)
        }
    }
}

/// The file manager struct that manages the files in the database
#[derive(Debug)]
pub struct FileManager {
    db_directory: PathBuf,
    blocksize: usize,
    is_new: bool,
    open_files: HashMap<String, File>,
}

impl FileManager {
    const TEMP_PREFIX: &'static str = "temp";

    pub fn new<P>(db_directory: &P, blocksize: usize) -> io::Result<Self>
    where
        P: AsRef<Path> + ?Sized,
    {
        let db_path = db_directory.as_ref().to_path_buf();
        fs::create_dir_all(&db_path)?;
        let is_new = fs::read_dir(&db_path)?.next().is_none();

        //  temporary tables from a previous run are never recovered
        for entry in fs::read_dir(&db_path)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(Self::TEMP_PREFIX)
            {
                fs::remove_file(entry.path())?;
            }
        }

        debug!(path = %db_path.display(), blocksize, is_new, "opened database directory");
        Ok(Self {
            db_directory: db_path,
            blocksize,
            is_new,
            open_files: HashMap::new(),
        })
    }

    pub fn blocksize(&self) -> usize {
        self.blocksize
    }

    /// Whether the database directory was created by this file manager
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Get the length of the file in blocks
    pub fn length(&mut self, filename: &str) -> io::Result<usize> {
        let file = self.get_file(filename)?;
        let len = file.metadata()?.len() as usize;
        Ok(len / self.blocksize)
    }

    /// Read the block provided by the block_id into the provided page.
    /// Bytes past the end of the file read as zero.
    pub fn read(&mut self, block_id: &BlockId, page: &mut Page) -> io::Result<()> {
        let offset = self.block_offset(block_id)?;
        let file = self.get_file(&block_id.filename)?;
        file.seek(io::SeekFrom::Start(offset))?;
        let buf = page.contents_mut();
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    /// Write the page to the block provided by the block_id
    pub fn write(&mut self, block_id: &BlockId, page: &Page) -> io::Result<()> {
        let offset = self.block_offset(block_id)?;
        let file = self.get_file(&block_id.filename)?;
        file.seek(io::SeekFrom::Start(offset))?;
        file.write_all(page.contents())?;
        file.sync_data()
    }

    /// Append a new, empty block to the file and return its id
    pub fn append(&mut self, filename: &str) -> io::Result<BlockId> {
        let new_blk_num = self.length(filename)?;
        let block_id = BlockId::new(filename, new_blk_num);
        let page = Page::new(self.blocksize);
        self.write(&block_id, &page)?;
        Ok(block_id)
    }

    fn block_offset(&self, block_id: &BlockId) -> io::Result<u64> {
        if block_id.is_end_of_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{block_id} cannot be read or written"),
            ));
        }
        Ok((block_id.block_num * self.blocksize) as u64)
    }

    /// Get the file handle for the file with the given filename
    fn get_file(&mut self, filename: &str) -> io::Result<&mut File> {
        if !self.open_files.contains_key(filename) {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(self.db_directory.join(filename))?;
            self.open_files.insert(filename.to_string(), file);
        }
        //  the entry was inserted above if it was missing
        self.open_files
            .get_mut(filename)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, filename.to_string()))
    }
}
