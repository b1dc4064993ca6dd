//! 在宿主机上测试用的替身：用堆内存充当物理页，记录切换的CPU，以及手工拼出的ELF镜像。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::config::{PAGE_SIZE, USER_SPACE_BASE};
use crate::mm::{frame_alloc, FrameAllocator, MapPermission, MemorySet, PhysPageNum, VirtAddr};
use crate::task::{ContextSwitch, Hart, ProcessManager};

#[repr(C, align(4096))]
struct Frame([u8; PAGE_SIZE]);

// 以4KB对齐的堆内存作为物理页，物理页号就是地址右移12位。
// 回收的页不会还给系统，保证悬空的页表项指向的仍是有效内存。
pub struct HeapFrameAllocator {
    limit: usize,
    live: BTreeMap<usize, Box<Frame>>,
    retired: Vec<Box<Frame>>,
}

impl HeapFrameAllocator {
    // 最多同时分配limit个物理页
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            live: BTreeMap::new(),
            retired: Vec::new(),
        }
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub fn in_use(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, ppn: PhysPageNum) -> bool {
        self.live.contains_key(&ppn.0)
    }
}

impl FrameAllocator for HeapFrameAllocator {
    fn alloc_frame(&mut self) -> Option<PhysPageNum> {
        if self.live.len() >= self.limit {
            return None;
        }
        let mut frame = self
            .retired
            .pop()
            .unwrap_or_else(|| Box::new(Frame([0; PAGE_SIZE])));
        // 故意写入垃圾数据，检查调用者是否自己清零
        frame.0.fill(0xa5);
        let ppn = frame.0.as_ptr() as usize >> 12;
        self.live.insert(ppn, frame);
        Some(PhysPageNum(ppn))
    }

    fn dealloc_frame(&mut self, ppn: PhysPageNum) {
        let frame = self
            .live
            .remove(&ppn.0)
            .unwrap_or_else(|| panic!("Frame {:?} has not been allocated!", ppn));
        self.retired.push(frame);
    }
}

pub const MOCK_START_PROCESS: usize = 0x8020_0abc;

// 只记录调度器要求的切换和satp的写入
pub struct MockHart {
    pub satp: usize,
    pub switches: Vec<(Option<usize>, Option<usize>)>,
}

impl MockHart {
    pub fn new() -> Self {
        Self {
            satp: (8usize << 60) | (0x2a << 44),
            switches: Vec::new(),
        }
    }
}

impl Hart for MockHart {
    fn satp(&self) -> usize {
        self.satp
    }

    fn set_satp(&mut self, satp: usize) {
        self.satp = satp;
    }

    fn start_process_entry(&self) -> usize {
        MOCK_START_PROCESS
    }

    unsafe fn switch_to(&mut self, switch: ContextSwitch) {
        self.switches.push((switch.from, switch.to));
    }
}

// 程序头中的标志位
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;
const PT_LOAD: u32 = 1;

// ELF头的大小，程序头表紧跟在它后面
pub const PH_OFFSET: usize = 64;
const PH_SIZE: usize = 56;

struct SegmentSpec {
    p_type: u32,
    flags: u32,
    vaddr: usize,
    data: Vec<u8>,
    mem_size: usize,
}

// 拼出一个最小的64位小端RISC-V可执行文件
pub struct ElfBuilder {
    entry: usize,
    segments: Vec<SegmentSpec>,
}

impl ElfBuilder {
    pub fn new(entry: usize) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    pub fn load(self, vaddr: usize, flags: u32, data: &[u8], mem_size: usize) -> Self {
        self.segment(PT_LOAD, flags, vaddr, data, mem_size)
    }

    pub fn segment(
        mut self,
        p_type: u32,
        flags: u32,
        vaddr: usize,
        data: &[u8],
        mem_size: usize,
    ) -> Self {
        self.segments.push(SegmentSpec {
            p_type,
            flags,
            vaddr,
            data: data.to_vec(),
            mem_size,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut image = Vec::new();
        // e_ident：魔数、64位、小端、版本1
        image.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        image.extend_from_slice(&[0; 8]);
        image.extend_from_slice(&2u16.to_le_bytes()); // e_type: EXEC
        image.extend_from_slice(&0xf3u16.to_le_bytes()); // e_machine: RISC-V
        image.extend_from_slice(&1u32.to_le_bytes()); // e_version
        image.extend_from_slice(&(self.entry as u64).to_le_bytes()); // e_entry
        image.extend_from_slice(&(PH_OFFSET as u64).to_le_bytes()); // e_phoff
        image.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        image.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        image.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
        image.extend_from_slice(&(PH_SIZE as u16).to_le_bytes()); // e_phentsize
        image.extend_from_slice(&(self.segments.len() as u16).to_le_bytes()); // e_phnum
        image.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
        image.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        image.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        assert_eq!(image.len(), PH_OFFSET);

        let mut offset = PH_OFFSET + PH_SIZE * self.segments.len();
        for seg in &self.segments {
            image.extend_from_slice(&seg.p_type.to_le_bytes());
            image.extend_from_slice(&seg.flags.to_le_bytes());
            image.extend_from_slice(&(offset as u64).to_le_bytes());
            image.extend_from_slice(&(seg.vaddr as u64).to_le_bytes());
            image.extend_from_slice(&(seg.vaddr as u64).to_le_bytes());
            image.extend_from_slice(&(seg.data.len() as u64).to_le_bytes());
            image.extend_from_slice(&(seg.mem_size as u64).to_le_bytes());
            image.extend_from_slice(&(PAGE_SIZE as u64).to_le_bytes());
            offset += seg.data.len();
        }
        for seg in &self.segments {
            image.extend_from_slice(&seg.data);
        }
        image
    }
}

// 只有一个代码页的程序，代码页的内容全是fill，入口在用户区的起始处
pub fn program(fill: u8) -> Vec<u8> {
    ElfBuilder::new(USER_SPACE_BASE)
        .load(USER_SPACE_BASE, PF_R | PF_X, &[fill; 64], 64)
        .build()
}

// 内核页表只映射了UART和一页内核代码，足够检查共享的根页表项
pub fn manager_with(frame_limit: usize, capacity: usize) -> ProcessManager<HeapFrameAllocator, MockHart> {
    let mut frames = HeapFrameAllocator::new(frame_limit);
    let mut kernel = MemorySet::new_bare(&mut frames).unwrap();
    for (va, perm) in [
        (0x1000_0000, MapPermission::R | MapPermission::W),
        (0x8020_0000, MapPermission::R | MapPermission::X),
    ] {
        let page = frame_alloc(&mut frames).unwrap();
        kernel
            .map_page(page, VirtAddr::from(va).floor(), perm, &mut frames)
            .unwrap();
    }
    ProcessManager::with_capacity(capacity, kernel.root_ppn(), frames, MockHart::new())
}
