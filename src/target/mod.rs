//! Job files: open/layout lifecycle, cursors, random maps, file service.
//!
//! A worker owns an arena of [`JobFile`]s addressed by index; IO units refer
//! to files by that index, never by pointer. Each file carries its region
//! cursor state and, for no-repeat random workloads, a [`randmap::RandomMap`]
//! at `rw_min_bs` granularity.

pub mod randmap;

use crate::config::workload::{FallocateMode, FileServiceType};
use crate::distribution::CursorState;
use crate::error::{Error, Result};
use crate::rng::RandSource;
use randmap::RandomMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Serializes file layout across workers when `create_serialize` is set.
static CREATE_LOCK: Mutex<()> = Mutex::new(());

/// How a job file gets opened and laid out.
#[derive(Debug, Clone, Default)]
pub struct OpenHow {
    pub create: bool,
    pub odirect: bool,
    pub sync_io: bool,
    pub fallocate: FallocateMode,
    /// fsync once after layout.
    pub create_fsync: bool,
    /// Take the global create lock during layout.
    pub create_serialize: bool,
}

#[derive(Debug)]
pub struct JobFile {
    path: PathBuf,
    file: Option<File>,
    /// Start of the IO region within the file.
    file_offset: u64,
    /// Length of the IO region.
    size: u64,
    pub cursor: CursorState,
    pub random_map: Option<RandomMap>,
}

impl JobFile {
    /// `size == 0` means "detect at open" (existing file or block device).
    pub fn new(path: impl Into<PathBuf>, file_offset: u64, size: u64) -> Self {
        Self {
            path: path.into(),
            file: None,
            file_offset,
            size,
            cursor: CursorState::new(file_offset, size),
            random_map: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn fd(&self) -> RawFd {
        self.file
            .as_ref()
            .map(|f| f.as_raw_fd())
            .expect("file not open")
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    /// Open (and if needed lay out) the file.
    pub fn open(&mut self, how: &OpenHow) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        let _guard = if how.create_serialize {
            Some(CREATE_LOCK.lock().expect("create lock poisoned"))
        } else {
            None
        };

        #[allow(unused_mut)]
        let mut custom = 0;
        if how.odirect {
            #[cfg(target_os = "linux")]
            {
                custom |= libc::O_DIRECT;
            }
        }
        if how.sync_io {
            custom |= libc::O_SYNC;
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if how.create {
            options.create(true);
        }
        if custom != 0 {
            options.custom_flags(custom);
        }
        let file = options.open(&self.path)?;

        let detected = detect_size(&file)?;
        if self.size == 0 {
            self.size = detected.saturating_sub(self.file_offset);
        }

        let wanted_end = self.file_offset + self.size;
        if detected < wanted_end && how.create {
            match how.fallocate {
                FallocateMode::Posix => {
                    let rc = unsafe {
                        libc::posix_fallocate(
                            file.as_raw_fd(),
                            self.file_offset as libc::off_t,
                            self.size as libc::off_t,
                        )
                    };
                    if rc != 0 {
                        return Err(Error::from_raw_os_error(rc));
                    }
                }
                FallocateMode::Keep => {
                    #[cfg(target_os = "linux")]
                    {
                        let rc = unsafe {
                            libc::fallocate(
                                file.as_raw_fd(),
                                libc::FALLOC_FL_KEEP_SIZE,
                                self.file_offset as libc::off_t,
                                self.size as libc::off_t,
                            )
                        };
                        if rc < 0 {
                            return Err(std::io::Error::last_os_error().into());
                        }
                    }
                }
                FallocateMode::None => {
                    // Extend with ftruncate so reads past the old end do not
                    // come back short.
                    let rc =
                        unsafe { libc::ftruncate(file.as_raw_fd(), wanted_end as libc::off_t) };
                    if rc < 0 {
                        return Err(std::io::Error::last_os_error().into());
                    }
                }
            }
            if how.create_fsync {
                file.sync_all()?;
            }
        }

        self.cursor = CursorState::new(self.file_offset, self.size);
        self.file = Some(file);
        Ok(())
    }

    /// Warm the page cache by reading the whole region through `scratch`.
    pub fn pre_read(&self, scratch: &mut [u8]) -> Result<()> {
        let fd = self.fd();
        let mut offset = self.file_offset;
        let end = self.file_offset + self.size;
        while offset < end {
            let want = scratch.len().min((end - offset) as usize);
            let rc = unsafe {
                libc::pread(
                    fd,
                    scratch.as_mut_ptr() as *mut libc::c_void,
                    want,
                    offset as libc::off_t,
                )
            };
            if rc < 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            if rc == 0 {
                break;
            }
            offset += rc as u64;
        }
        Ok(())
    }

    /// Attach a no-repeat random map at `min_bs` granularity.
    pub fn init_random_map(&mut self, min_bs: u32) {
        self.random_map = Some(RandomMap::for_file(self.size, min_bs));
    }

    /// Rewind cursors and the random map for the next loop pass.
    pub fn restart(&mut self) {
        self.cursor.restart();
        if let Some(map) = &mut self.random_map {
            map.reset();
        }
    }

    pub fn close(&mut self, fsync_on_close: bool) -> Result<()> {
        if let Some(file) = self.file.take() {
            if fsync_on_close {
                file.sync_all()?;
            }
        }
        Ok(())
    }

    /// Remove the file from the filesystem after closing it.
    pub fn unlink(&mut self) -> Result<()> {
        self.file = None;
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

fn detect_size(file: &File) -> Result<u64> {
    // lseek works for both regular files and block devices, where metadata
    // length reads 0.
    let end = unsafe { libc::lseek(file.as_raw_fd(), 0, libc::SEEK_END) };
    if end < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(end as u64)
}

/// Picks which file the next IO goes to.
#[derive(Debug, Clone)]
pub struct FileService {
    kind: FileServiceType,
    /// Consecutive IOs per file before moving on.
    per_file: u32,
    cur: usize,
    left: u32,
}

impl FileService {
    pub fn new(kind: FileServiceType, per_file: u32) -> Self {
        let per_file = per_file.max(1);
        Self {
            kind,
            per_file,
            cur: 0,
            left: per_file,
        }
    }

    /// Index of the file for the next IO.
    pub fn next(&mut self, nr_files: usize, rng: &mut RandSource) -> usize {
        if nr_files <= 1 {
            return 0;
        }
        match self.kind {
            FileServiceType::RoundRobin => {
                if self.left == 0 {
                    self.cur = (self.cur + 1) % nr_files;
                    self.left = self.per_file;
                }
                self.left -= 1;
                self.cur
            }
            FileServiceType::Random => {
                if self.left == 0 {
                    self.cur = rng.next_below(nr_files as u64) as usize;
                    self.left = self.per_file;
                }
                self.left -= 1;
                self.cur
            }
            // Sequential service finishes a file before moving on; the
            // worker signals that with advance().
            FileServiceType::Sequential => self.cur.min(nr_files - 1),
        }
    }

    /// Move sequential service to the next file. Returns false once every
    /// file has been consumed.
    pub fn advance(&mut self, nr_files: usize) -> bool {
        self.cur += 1;
        self.cur < nr_files
    }

    pub fn restart(&mut self) {
        self.cur = 0;
        self.left = self.per_file;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::workload::{DataDir, SeqMode};
    use crate::distribution::OffsetGenerator;

    #[test]
    fn test_open_create_and_detect_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.0");
        let mut file = JobFile::new(&path, 0, 64 * 1024);
        file.open(&OpenHow {
            create: true,
            fallocate: FallocateMode::None,
            ..Default::default()
        })
        .unwrap();
        assert!(file.is_open());
        assert_eq!(file.size(), 64 * 1024);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64 * 1024);

        // Reopening an existing file with size 0 detects the real size.
        let mut reopened = JobFile::new(&path, 0, 0);
        reopened
            .open(&OpenHow {
                create: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(reopened.size(), 64 * 1024);
    }

    #[test]
    fn test_file_offset_shrinks_detected_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.1");
        std::fs::write(&path, vec![0u8; 100 * 1024]).unwrap();

        let mut file = JobFile::new(&path, 36 * 1024, 0);
        file.open(&OpenHow::default()).unwrap();
        assert_eq!(file.size(), 64 * 1024);

        // The cursor starts at the region offset.
        let gen = OffsetGenerator::new(false, SeqMode::Sequential);
        let mut rng = RandSource::new(false, 1);
        let (off, _) = gen
            .next(&mut file.cursor, None, DataDir::Read, 4096, 4096, &mut rng)
            .unwrap();
        assert_eq!(off, 36 * 1024);
    }

    #[test]
    fn test_unlink_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.2");
        let mut file = JobFile::new(&path, 0, 4096);
        file.open(&OpenHow {
            create: true,
            fallocate: FallocateMode::None,
            ..Default::default()
        })
        .unwrap();
        file.close(false).unwrap();
        file.unlink().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_restart_resets_map_and_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.3");
        let mut file = JobFile::new(&path, 0, 16 * 1024);
        file.open(&OpenHow {
            create: true,
            fallocate: FallocateMode::None,
            ..Default::default()
        })
        .unwrap();
        file.init_random_map(4096);
        file.random_map.as_mut().unwrap().mark(0);
        file.restart();
        assert_eq!(file.random_map.as_ref().unwrap().nr_free(), 4);
    }

    #[test]
    fn test_round_robin_service() {
        let mut svc = FileService::new(FileServiceType::RoundRobin, 2);
        let mut rng = RandSource::new(false, 1);
        let picks: Vec<usize> = (0..8).map(|_| svc.next(3, &mut rng)).collect();
        assert_eq!(picks, vec![0, 0, 1, 1, 2, 2, 0, 0]);
    }

    #[test]
    fn test_random_service_in_range() {
        let mut svc = FileService::new(FileServiceType::Random, 1);
        let mut rng = RandSource::new(false, 9);
        let mut seen = [false; 4];
        for _ in 0..200 {
            seen[svc.next(4, &mut rng)] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_sequential_service_advances_on_signal() {
        let mut svc = FileService::new(FileServiceType::Sequential, 1);
        let mut rng = RandSource::new(false, 1);
        assert_eq!(svc.next(2, &mut rng), 0);
        assert_eq!(svc.next(2, &mut rng), 0);
        assert!(svc.advance(2));
        assert_eq!(svc.next(2, &mut rng), 1);
        assert!(!svc.advance(2));
    }
}
