//! # Image Loader
//!
//! Maps an executable image into a freshly created process.
//!
//! Parsing the image format is delegated to an [`ImageParser`]; the loader
//! only sees loadable segments and the entry point. Every thread stack band
//! is mapped up front so thread creation never needs memory later.

pub mod elf;

pub use elf::ElfParser;

use crate::kernel::Kernel;
use crate::{ExecError, ExecResult, Priority, ProcessId};
use lattice_hal::{Machine, PageFlags, VirtAddr, PAGE_SIZE};
use lattice_memory::layout::{is_user_range, USTACKBOTTOM, USTACKTOP};
use lattice_memory::{AddressSpace, FrameAllocator};

/// One loadable segment of an image
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    /// First virtual address of the segment
    pub vaddr: VirtAddr,
    /// Bytes backed by the image
    pub file_size: u64,
    /// Bytes occupied in memory; the tail past `file_size` is zeroed
    pub mem_size: u64,
    /// Segment contents as stored in the image
    pub data: &'a [u8],
}

impl Segment<'_> {
    /// First address past the in-memory extent
    pub fn end(&self) -> u64 {
        self.vaddr.as_u64() + self.mem_size
    }

    fn validate(&self) -> ExecResult<()> {
        if self.mem_size < self.file_size || (self.data.len() as u64) < self.file_size {
            return Err(ExecError::InvalidImage);
        }
        if !is_user_range(self.vaddr, self.mem_size) {
            return Err(ExecError::InvalidImage);
        }
        Ok(())
    }
}

/// Executable image format
pub trait ImageParser {
    /// Walk `image`, calling `map` once per loadable segment
    ///
    /// Returns the entry point. Errors from `map` abort the walk and are
    /// returned unchanged.
    fn parse(
        &self,
        image: &[u8],
        map: &mut dyn FnMut(&Segment<'_>) -> ExecResult<()>,
    ) -> ExecResult<VirtAddr>;
}

/// Map the page at `page` in `space`, reusing an existing mapping
fn user_page<A: FrameAllocator>(
    frames: &mut A,
    space: &AddressSpace,
    page: VirtAddr,
) -> ExecResult<lattice_memory::Frame> {
    if let Some((frame, _)) = space.translate(frames, page) {
        return Ok(frame);
    }
    let frame = frames.allocate_frame()?;
    let mapped = space.mapper(frames).map(page, frame, PageFlags::user_image());
    if let Err(err) = mapped {
        frames.decref(frame);
        return Err(err.into());
    }
    Ok(frame)
}

/// Copy `segment` into `space` page by page
fn map_segment<A: FrameAllocator>(
    frames: &mut A,
    space: &AddressSpace,
    segment: &Segment<'_>,
) -> ExecResult<()> {
    segment.validate()?;
    if segment.mem_size == 0 {
        return Ok(());
    }
    let start = segment.vaddr.as_u64();
    let file_end = start + segment.file_size;
    let mem_end = segment.end();

    let mut page = segment.vaddr.align_down(PAGE_SIZE).as_u64();
    while page < mem_end {
        let frame = user_page(frames, space, VirtAddr::new(page))?;
        let bytes = frames.frame_bytes_mut(frame)?;

        let lo = start.max(page);
        let hi = mem_end.min(page + PAGE_SIZE);
        let copy_hi = file_end.clamp(lo, hi);
        if copy_hi > lo {
            let src = (lo - start) as usize..(copy_hi - start) as usize;
            let dst = (lo - page) as usize..(copy_hi - page) as usize;
            bytes[dst].copy_from_slice(&segment.data[src]);
        }
        bytes[(copy_hi - page) as usize..(hi - page) as usize].fill(0);

        page += PAGE_SIZE;
    }

    log::trace!(
        "segment {} mapped ({} file bytes, {} in memory)",
        segment.vaddr,
        segment.file_size,
        segment.mem_size
    );
    Ok(())
}

impl<A: FrameAllocator, M: Machine> Kernel<A, M> {
    /// Load `image` into process `pid` and point its first thread at the entry
    ///
    /// On failure the process is left partially built; the caller destroys it.
    pub fn load_image<P: ImageParser + ?Sized>(
        &mut self,
        pid: ProcessId,
        image: &[u8],
        parser: &P,
    ) -> ExecResult<VirtAddr> {
        let process = self.processes.get(pid).ok_or(ExecError::InvalidId)?;
        let space = process.address_space.as_ref().ok_or(ExecError::InvalidId)?;
        let frames = &mut self.frames;

        let mut stack = USTACKBOTTOM;
        while stack < USTACKTOP {
            user_page(frames, space, VirtAddr::new(stack))?;
            stack += PAGE_SIZE;
        }

        let entry = parser.parse(image, &mut |segment| map_segment(&mut *frames, space, segment))?;

        let process = self.processes.get_mut(pid).ok_or(ExecError::InvalidId)?;
        let first = process
            .threads
            .iter_mut()
            .find(|t| !t.is_free())
            .ok_or(ExecError::InvalidId)?;
        first.context.pc = entry.as_u64();

        log::info!("image loaded into {:#x}, entry {}", pid.as_u32(), entry);
        Ok(entry)
    }

    /// Create a child of the caller (or a root process) running `image`
    ///
    /// The first thread gets `priority` and is queued ready to run. A
    /// partially built process is destroyed before the error is returned.
    pub fn create_process_with_priority<P: ImageParser + ?Sized>(
        &mut self,
        parent: Option<ProcessId>,
        image: &[u8],
        parser: &P,
        priority: Priority,
    ) -> ExecResult<ProcessId> {
        let pid = self.create_process(parent)?;
        if let Err(err) = self.load_image(pid, image, parser) {
            log::warn!("loading into {:#x} failed: {}", pid.as_u32(), err);
            self.destroy_process(pid)?;
            return Err(err);
        }

        let first = self
            .process(pid)?
            .thread_ids()
            .next()
            .ok_or(ExecError::InvalidId)?;
        self.set_thread_priority(first, priority)?;
        self.scheduler.enqueue(first);
        Ok(pid)
    }

    /// Create a root process running `image` at the default priority
    pub fn create_process_from_image<P: ImageParser + ?Sized>(
        &mut self,
        image: &[u8],
        parser: &P,
    ) -> ExecResult<ProcessId> {
        let priority = self.config.default_priority;
        self.create_process_with_priority(None, image, parser, priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::kernel;
    use crate::ThreadStatus;
    use lattice_memory::layout::UTOP;

    /// Hands out a fixed list of segments
    struct Segments<'a> {
        entry: u64,
        list: Vec<(u64, u64, &'a [u8])>,
    }

    impl ImageParser for Segments<'_> {
        fn parse(
            &self,
            _image: &[u8],
            map: &mut dyn FnMut(&Segment<'_>) -> ExecResult<()>,
        ) -> ExecResult<VirtAddr> {
            for &(vaddr, mem_size, data) in &self.list {
                map(&Segment {
                    vaddr: VirtAddr::new(vaddr),
                    file_size: data.len() as u64,
                    mem_size,
                    data,
                })?;
            }
            Ok(VirtAddr::new(self.entry))
        }
    }

    fn read_user(k: &crate::kernel::tests::TestKernel, pid: ProcessId, va: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        k.process(pid)
            .unwrap()
            .address_space()
            .unwrap()
            .copy_from_user(k.frames(), VirtAddr::new(va), &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_unaligned_segment_with_bss_tail() {
        let mut k = kernel();
        let pid = k.create_process(None).unwrap();
        let data: Vec<u8> = (1..=200u8).collect();
        let parser = Segments {
            entry: 0x40_0f80,
            list: vec![(0x40_0f80, 0x2000, &data[..])],
        };
        let entry = k.load_image(pid, &[], &parser).unwrap();
        assert_eq!(entry.as_u64(), 0x40_0f80);

        assert_eq!(read_user(&k, pid, 0x40_0f80, 200), data);
        // in-memory tail beyond the file bytes reads as zero
        assert!(read_user(&k, pid, 0x40_0f80 + 200, 0x2000 - 200).iter().all(|&b| b == 0));
        let first = k.process(pid).unwrap().thread_ids().next().unwrap();
        assert_eq!(k.thread(first).unwrap().context().pc, 0x40_0f80);
    }

    #[test]
    fn test_stack_bands_premapped() {
        let mut k = kernel();
        let pid = k.create_process(None).unwrap();
        let parser = Segments { entry: 0x1000, list: vec![] };
        k.load_image(pid, &[], &parser).unwrap();
        let space = k.process(pid).unwrap().address_space().unwrap();
        let pages = ((USTACKTOP - USTACKBOTTOM) / PAGE_SIZE) as usize;
        assert_eq!(space.user_page_count(k.frames()), pages);
        assert!(space.translate(k.frames(), VirtAddr::new(USTACKTOP - 8)).is_some());
    }

    #[test]
    fn test_segments_sharing_a_page() {
        let mut k = kernel();
        let pid = k.create_process(None).unwrap();
        let text = [0xaau8; 16];
        let rodata = [0xbbu8; 16];
        let parser = Segments {
            entry: 0x1000,
            list: vec![(0x1000, 16, &text[..]), (0x1010, 16, &rodata[..])],
        };
        k.load_image(pid, &[], &parser).unwrap();
        let bytes = read_user(&k, pid, 0x1000, 32);
        assert_eq!(&bytes[..16], &text);
        assert_eq!(&bytes[16..], &rodata);
    }

    #[test]
    fn test_segment_above_user_top_rejected() {
        let mut k = kernel();
        let pid = k.create_process(None).unwrap();
        let parser = Segments {
            entry: 0x1000,
            list: vec![(UTOP - 8, 16, &[0u8; 16][..])],
        };
        assert_eq!(k.load_image(pid, &[], &parser), Err(ExecError::InvalidImage));
    }

    #[test]
    fn test_create_with_priority_queues_first_thread() {
        let mut k = kernel();
        let parser = Segments { entry: 0x2000, list: vec![(0x2000, 4, &[1u8, 2, 3, 4][..])] };
        let pid = k
            .create_process_with_priority(None, &[], &parser, Priority::new(5).unwrap())
            .unwrap();
        let first = k.process(pid).unwrap().thread_ids().next().unwrap();
        let thread = k.thread(first).unwrap();
        assert_eq!(thread.priority().get(), 5);
        assert_eq!(thread.status(), ThreadStatus::Runnable);
        assert!(k.scheduler().contains(first));
    }

    #[test]
    fn test_failed_load_destroys_process() {
        let mut k = kernel();
        let free = k.frames().free_frames();
        let parser = Segments { entry: 0x1000, list: vec![(UTOP, 16, &[0u8; 16][..])] };
        assert_eq!(k.create_process_from_image(&[], &parser), Err(ExecError::InvalidImage));
        assert_eq!(k.frames().free_frames(), free);
        assert_eq!(k.asids().in_use(), 0);
        assert!(k.scheduler().is_empty());
    }
}
