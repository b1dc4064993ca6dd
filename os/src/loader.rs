//! 将ELF格式的用户程序加载到进程的地址空间中
//!
//! 程序镜像是内存中的一段字节（没有文件系统），用库xmas_elf来解析。

use alloc::vec;
use alloc::vec::Vec;
use core::cmp::{max, min};
use core::mem::size_of;

use log::{debug, trace};
use xmas_elf::{header::Class, program::Type, ElfFile};

use crate::config::{PAGE_SIZE, USER_SPACE_BASE, USER_SPACE_END};
use crate::error::LoadError;
use crate::mm::{
    frame_alloc, FrameAllocator, MapPermission, MemorySet, PhysPageNum, VPNRange, VirtAddr,
    VirtPageNum,
};

// 64位ELF的程序头大小
const PH64_SIZE: usize = 56;
// xmas_elf直接在镜像上按结构体读取头部，镜像和程序头都必须按8字节对齐
const ELF_ALIGN: usize = size_of::<u64>();

// 把elf_data中所有类型为Load的段映射到memory_set的用户区，并拷贝段的内容，返回程序入口地址。
// 段的[vaddr, vaddr + memsz)所覆盖的每一页都会被映射，超出filesz的部分保持为0（.bss）。
// 中途失败时，已经建立的映射保留在memory_set中，由调用者回收整个地址空间。
pub fn load_elf<A: FrameAllocator + ?Sized>(
    elf_data: &[u8],
    memory_set: &mut MemorySet,
    frames: &mut A,
) -> Result<usize, LoadError> {
    if elf_data.as_ptr() as usize % ELF_ALIGN != 0 {
        // 镜像不在对齐的地址上，先拷贝一份
        let aligned = AlignedImage::copy_from(elf_data);
        return load_aligned(aligned.as_bytes(), memory_set, frames);
    }
    load_aligned(elf_data, memory_set, frames)
}

// 以u64为单位分配的镜像副本，起始地址按8字节对齐
struct AlignedImage {
    words: Vec<u64>,
    len: usize,
}

impl AlignedImage {
    fn copy_from(data: &[u8]) -> Self {
        let mut words = vec![0u64; (data.len() + ELF_ALIGN - 1) / ELF_ALIGN];
        let bytes = unsafe {
            core::slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, data.len())
        };
        bytes.copy_from_slice(data);
        Self {
            words,
            len: data.len(),
        }
    }

    fn as_bytes(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }
}

fn load_aligned<A: FrameAllocator + ?Sized>(
    elf_data: &[u8],
    memory_set: &mut MemorySet,
    frames: &mut A,
) -> Result<usize, LoadError> {
    let elf = ElfFile::new(elf_data).map_err(|_| LoadError::MalformedImage)?;
    let elf_header = elf.header;
    // 只支持64位的程序
    match elf_header.pt1.class() {
        Class::SixtyFour => {}
        _ => return Err(LoadError::MalformedImage),
    }
    let ph_count = elf_header.pt2.ph_count();
    check_ph_table(
        elf_data.len(),
        elf_header.pt2.ph_offset() as usize,
        elf_header.pt2.ph_entry_size() as usize,
        ph_count as usize,
    )?;
    for i in 0..ph_count {
        let ph = elf
            .program_header(i)
            .map_err(|_| LoadError::MalformedImage)?;
        // 类型为Load，表示该区域需要被加载进内存
        match ph.get_type() {
            Ok(Type::Load) => {}
            Ok(_) => continue,
            Err(_) => return Err(LoadError::MalformedImage),
        }
        let segment = Segment {
            vaddr: ph.virtual_addr() as usize,
            offset: ph.offset() as usize,
            file_size: ph.file_size() as usize,
            mem_size: ph.mem_size() as usize,
            perm: {
                // 读取访问权限，用户态总是可以访问
                let mut map_perm = MapPermission::U;
                let ph_flags = ph.flags();
                if ph_flags.is_read() {
                    map_perm |= MapPermission::R;
                }
                if ph_flags.is_write() {
                    map_perm |= MapPermission::W;
                }
                if ph_flags.is_execute() {
                    map_perm |= MapPermission::X;
                }
                map_perm
            },
        };
        segment.load(elf_data, memory_set, frames)?;
    }
    let entry = elf_header.pt2.entry_point() as usize;
    debug!("elf loaded, entry = {:#x}", entry);
    Ok(entry)
}

// 程序头表必须完整地落在镜像内
fn check_ph_table(
    image_len: usize,
    ph_offset: usize,
    ph_entry_size: usize,
    ph_count: usize,
) -> Result<(), LoadError> {
    if ph_count == 0 {
        return Ok(());
    }
    if ph_offset == 0 || ph_entry_size < PH64_SIZE {
        return Err(LoadError::MalformedImage);
    }
    // 每个程序头都要落在8字节对齐的位置上
    if ph_offset % ELF_ALIGN != 0 || ph_entry_size % ELF_ALIGN != 0 {
        return Err(LoadError::MalformedImage);
    }
    let table_end = ph_entry_size
        .checked_mul(ph_count)
        .and_then(|size| size.checked_add(ph_offset))
        .ok_or(LoadError::MalformedImage)?;
    if table_end > image_len {
        return Err(LoadError::MalformedImage);
    }
    Ok(())
}

struct Segment {
    vaddr: usize,
    offset: usize,
    file_size: usize,
    mem_size: usize,
    perm: MapPermission,
}

impl Segment {
    fn load<A: FrameAllocator + ?Sized>(
        &self,
        elf_data: &[u8],
        memory_set: &mut MemorySet,
        frames: &mut A,
    ) -> Result<(), LoadError> {
        if self.file_size > self.mem_size {
            return Err(LoadError::MalformedImage);
        }
        // 没有R/W/X的页表项会被当成指向下一级页表的非叶子项
        if !self
            .perm
            .intersects(MapPermission::R | MapPermission::W | MapPermission::X)
        {
            return Err(LoadError::MalformedImage);
        }
        let data = self
            .offset
            .checked_add(self.file_size)
            .and_then(|end| elf_data.get(self.offset..end))
            .ok_or(LoadError::MalformedImage)?;
        // 段必须落在用户区里，否则会修改到与内核共享的子页表
        let end_va = self
            .vaddr
            .checked_add(self.mem_size)
            .ok_or(LoadError::MalformedImage)?;
        if self.vaddr < USER_SPACE_BASE || end_va > USER_SPACE_END {
            return Err(LoadError::MalformedImage);
        }
        trace!(
            "load segment [{:#x}, {:#x}) filesz={:#x} {:?}",
            self.vaddr,
            end_va,
            self.file_size,
            self.perm
        );
        let file_end = self.vaddr + self.file_size;
        let vpn_range = VPNRange::new(VirtAddr::from(self.vaddr).floor(), VirtAddr::from(end_va).ceil());
        for vpn in vpn_range {
            let page_start: usize = VirtAddr::from(vpn).into();
            let ppn = self.page_for(vpn, memory_set, frames)?;
            // 本页与[vaddr, vaddr + filesz)的交集，从文件拷贝到页中
            let copy_start = max(page_start, self.vaddr);
            let copy_end = min(page_start + PAGE_SIZE, file_end);
            if copy_start < copy_end {
                ppn.get_bytes_array()[copy_start - page_start..copy_end - page_start]
                    .copy_from_slice(&data[copy_start - self.vaddr..copy_end - self.vaddr]);
            }
        }
        Ok(())
    }

    // 取得虚拟页对应的物理页。与前一个段共用的边界页直接复用，权限以先映射的为准。
    fn page_for<A: FrameAllocator + ?Sized>(
        &self,
        vpn: VirtPageNum,
        memory_set: &mut MemorySet,
        frames: &mut A,
    ) -> Result<PhysPageNum, LoadError> {
        if let Some(pte) = memory_set.translate(vpn).filter(|pte| pte.is_valid()) {
            return Ok(pte.ppn());
        }
        let ppn = frame_alloc(frames).ok_or(LoadError::OutOfMemory)?;
        if let Err(e) = memory_set.map_page(ppn, vpn, self.perm, frames) {
            frames.dealloc_frame(ppn);
            return Err(e.into());
        }
        Ok(ppn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::PTEFlags;
    use crate::test_util::{ElfBuilder, HeapFrameAllocator, PF_R, PF_W, PF_X, PH_OFFSET};
    use alloc::vec::Vec;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    fn read_user_byte(ms: &MemorySet, va: usize) -> u8 {
        let pa = ms.translate_va(VirtAddr::from(va)).unwrap();
        unsafe { *(pa.0 as *const u8) }
    }

    #[test]
    fn aligned_segment_is_copied_and_zero_filled() {
        let mut frames = HeapFrameAllocator::new(32);
        let mut ms = MemorySet::new_bare(&mut frames).unwrap();
        let data = pattern(100);
        let image = ElfBuilder::new(0x1_0000_0010)
            .load(0x1_0000_0000, PF_R | PF_X, &data, 0x1800)
            .build();
        let entry = load_elf(&image, &mut ms, &mut frames).unwrap();
        assert_eq!(entry, 0x1_0000_0010);
        assert_eq!(ms.user_page_count(), 2);
        let first = ms.translate(VirtAddr::from(0x1_0000_0000).floor()).unwrap();
        let bytes = first.ppn().get_bytes_array();
        assert_eq!(&bytes[..100], &data[..]);
        assert!(bytes[100..].iter().all(|&b| b == 0));
        assert!(first.flags().contains(PTEFlags::R | PTEFlags::X | PTEFlags::U));
        assert!(!first.writable());
        let second = ms.translate(VirtAddr::from(0x1_0000_1000).floor()).unwrap();
        assert!(second.ppn().get_bytes_array().iter().all(|&b| b == 0));
    }

    #[test]
    fn unaligned_segment_keeps_byte_offsets() {
        let mut frames = HeapFrameAllocator::new(32);
        let mut ms = MemorySet::new_bare(&mut frames).unwrap();
        let vaddr = 0x1_0000_0ff0;
        let data = pattern(0x30);
        let image = ElfBuilder::new(vaddr)
            .load(vaddr, PF_R | PF_W, &data, data.len())
            .build();
        load_elf(&image, &mut ms, &mut frames).unwrap();
        assert_eq!(ms.user_page_count(), 2);
        for (k, byte) in data.iter().enumerate() {
            assert_eq!(read_user_byte(&ms, vaddr + k), *byte, "byte {}", k);
        }
        // 段前面的部分保持为0
        assert_eq!(read_user_byte(&ms, 0x1_0000_0000), 0);
    }

    #[test]
    fn adjacent_segments_share_boundary_page() {
        let mut frames = HeapFrameAllocator::new(32);
        let mut ms = MemorySet::new_bare(&mut frames).unwrap();
        let text = pattern(0x1100);
        let data = [0x5a; 0x100];
        let image = ElfBuilder::new(0x1_0000_0000)
            .load(0x1_0000_0000, PF_R | PF_X, &text, text.len())
            .load(0x1_0000_1100, PF_R | PF_W, &data, 0x200)
            .build();
        load_elf(&image, &mut ms, &mut frames).unwrap();
        assert_eq!(ms.user_page_count(), 2);
        assert_eq!(read_user_byte(&ms, 0x1_0000_10ff), text[0x10ff]);
        assert_eq!(read_user_byte(&ms, 0x1_0000_1100), 0x5a);
        assert_eq!(read_user_byte(&ms, 0x1_0000_1200), 0);
    }

    #[test]
    fn non_load_segments_are_skipped() {
        let mut frames = HeapFrameAllocator::new(32);
        let mut ms = MemorySet::new_bare(&mut frames).unwrap();
        let image = ElfBuilder::new(0x1_0000_0000)
            .segment(4, PF_R, 0x1_0000_0000, &[1, 2, 3, 4], 4)
            .build();
        assert_eq!(load_elf(&image, &mut ms, &mut frames), Ok(0x1_0000_0000));
        assert_eq!(ms.user_page_count(), 0);
    }

    #[test]
    fn inconsistent_headers_are_rejected() {
        let mut frames = HeapFrameAllocator::new(64);
        let good = ElfBuilder::new(0x1_0000_0000)
            .load(0x1_0000_0000, PF_R, &[0u8; 16], 16)
            .build();

        // filesz > memsz
        let mut image = good.clone();
        image[PH_OFFSET + 40..PH_OFFSET + 48].copy_from_slice(&8u64.to_le_bytes());
        let mut ms = MemorySet::new_bare(&mut frames).unwrap();
        assert_eq!(load_elf(&image, &mut ms, &mut frames), Err(LoadError::MalformedImage));

        // 段的内容超出镜像
        let mut image = good.clone();
        image[PH_OFFSET + 8..PH_OFFSET + 16].copy_from_slice(&0x10_0000u64.to_le_bytes());
        assert_eq!(load_elf(&image, &mut ms, &mut frames), Err(LoadError::MalformedImage));

        // 段落在内核区
        let image = ElfBuilder::new(0x8020_0000)
            .load(0x8020_0000, PF_R | PF_X, &[0u8; 16], 16)
            .build();
        assert_eq!(load_elf(&image, &mut ms, &mut frames), Err(LoadError::MalformedImage));

        // 程序头表超出镜像
        let mut image = good.clone();
        image[56..58].copy_from_slice(&200u16.to_le_bytes());
        assert_eq!(load_elf(&image, &mut ms, &mut frames), Err(LoadError::MalformedImage));

        // 32位的ELF
        let mut image = good.clone();
        image[4] = 1;
        assert_eq!(load_elf(&image, &mut ms, &mut frames), Err(LoadError::MalformedImage));

        // 根本不是ELF
        assert_eq!(
            load_elf(b"#!/bin/sh\necho hi\n", &mut ms, &mut frames),
            Err(LoadError::MalformedImage)
        );
        assert_eq!(ms.user_page_count(), 0);
    }

    #[test]
    fn misaligned_program_headers_are_rejected() {
        let mut frames = HeapFrameAllocator::new(32);
        let mut ms = MemorySet::new_bare(&mut frames).unwrap();
        let good = ElfBuilder::new(0x1_0000_0000)
            .load(0x1_0000_0000, PF_R, &[0u8; 16], 16)
            .build();

        // e_phoff不是8的倍数
        let mut image = good.clone();
        image[32..40].copy_from_slice(&(PH_OFFSET as u64 + 1).to_le_bytes());
        assert_eq!(load_elf(&image, &mut ms, &mut frames), Err(LoadError::MalformedImage));

        // e_phentsize不是8的倍数，第二个程序头就不对齐了
        let mut image = good.clone();
        image[54..56].copy_from_slice(&60u16.to_le_bytes());
        assert_eq!(load_elf(&image, &mut ms, &mut frames), Err(LoadError::MalformedImage));
        assert_eq!(ms.user_page_count(), 0);
    }

    #[test]
    fn image_at_odd_address_is_loaded() {
        let mut frames = HeapFrameAllocator::new(32);
        let mut ms = MemorySet::new_bare(&mut frames).unwrap();
        let data = pattern(40);
        let image = ElfBuilder::new(0x1_0000_0004)
            .load(0x1_0000_0000, PF_R | PF_X, &data, data.len())
            .build();
        let mut buf = vec![0u8; image.len() + ELF_ALIGN];
        let shift = (0..ELF_ALIGN)
            .find(|&i| (buf.as_ptr() as usize + i) % ELF_ALIGN == 1)
            .unwrap();
        buf[shift..shift + image.len()].copy_from_slice(&image);
        let odd = &buf[shift..shift + image.len()];
        assert_eq!(odd.as_ptr() as usize % ELF_ALIGN, 1);

        assert_eq!(load_elf(odd, &mut ms, &mut frames), Ok(0x1_0000_0004));
        for (k, byte) in data.iter().enumerate() {
            assert_eq!(read_user_byte(&ms, 0x1_0000_0000 + k), *byte);
        }
    }

    #[test]
    fn segment_without_permissions_is_rejected() {
        let mut frames = HeapFrameAllocator::new(32);
        let mut ms = MemorySet::new_bare(&mut frames).unwrap();
        let image = ElfBuilder::new(0x1_0000_0000)
            .load(0x1_0000_0000, PF_R, &[1u8; 16], 16)
            .load(0x1_0000_2000, 0, &[2u8; 16], 16)
            .build();
        assert_eq!(load_elf(&image, &mut ms, &mut frames), Err(LoadError::MalformedImage));
        // 只有第一个段被映射，没有留下无法遍历到的页
        assert_eq!(ms.user_page_count(), 1);
        assert!(ms
            .translate(VirtAddr::from(0x1_0000_2000).floor())
            .map_or(true, |pte| !pte.is_valid()));
    }

    #[test]
    fn running_out_of_frames_keeps_earlier_pages() {
        let mut frames = HeapFrameAllocator::new(64);
        let mut ms = MemorySet::new_bare(&mut frames).unwrap();
        let data = pattern(0x2000);
        let image = ElfBuilder::new(0x1_0000_0000)
            .load(0x1_0000_0000, PF_R, &data, data.len())
            .build();
        // 第一页需要数据页、L1、L0，第二页的数据页分配失败
        frames.set_limit(frames.in_use() + 3);
        assert_eq!(
            load_elf(&image, &mut ms, &mut frames),
            Err(LoadError::OutOfMemory)
        );
        assert_eq!(ms.user_page_count(), 1);
        assert_eq!(frames.in_use(), 4);
    }
}
