//! 轮转调度与进程切换
use log::debug;

use super::manager::ProcessManager;
use super::process::ProcessStatus;
use super::switch::{ContextSwitch, Hart};
use crate::mm::{satp_with_root, FrameAllocator, PhysPageNum};

impl<A: FrameAllocator, H: Hart> ProcessManager<A, H> {
    // 下面三个函数在持有self的借用时执行切换，只用于宿主机上的测试。
    // 内核使用prepare_schedule，释放借用后再执行ContextSwitch::run（见kernel.rs）。

    // 从idle控制流切换到第一个就绪进程。只有当CPU再次回到idle控制流时才会返回。
    #[cfg(test)]
    pub fn run_first_process(&mut self) {
        if self.current.is_none() {
            self.schedule();
        }
    }

    // 时钟中断或进程主动让出CPU时调用。就绪队列为空时什么都不做。
    #[cfg(test)]
    pub fn schedule(&mut self) {
        if let Some(switch) = self.prepare_schedule() {
            unsafe {
                self.hart.switch_to(switch);
            }
        }
    }

    // 当前进程退出，切换到下一个进程
    #[cfg(test)]
    pub fn exit_current(&mut self) {
        if let Some(pid) = self.current {
            if let Ok(pcb) = self.find_process_by_pid_mut(pid) {
                pcb.status = ProcessStatus::Dead;
            }
            self.schedule();
        }
    }

    // 决定下一个运行的进程，更新调度状态和satp，但不执行切换。
    // 返回None表示继续执行当前的控制流。
    pub fn prepare_schedule(&mut self) -> Option<ContextSwitch> {
        self.reap();
        let current = match self.current {
            Some(pid) => pid,
            None => {
                let idle_sp = &mut self.idle_sp as *mut usize;
                return self.switch_to_next(None, idle_sp);
            }
        };
        let Some(pcb) = self.pool.get_mut(current) else {
            self.current = None;
            let idle_sp = &mut self.idle_sp as *mut usize;
            return self.switch_to_next(None, idle_sp);
        };
        let current_sp = pcb.kernel_sp_ptr();

        if self.ready_queue.is_empty() {
            if pcb.status != ProcessStatus::Dead {
                return None;
            }
            // 最后一个进程也死了，回到idle控制流
            self.current = None;
            self.pending_reclaim.push(current);
            self.set_l2_page_table(self.kernel_root);
            debug!("schedule process {} to idle", current);
            return Some(ContextSwitch {
                from: Some(current),
                to: None,
                current_sp,
                next_sp: self.idle_sp,
            });
        }

        // 时间片
        pcb.total_ticks += 1;
        pcb.ticks_after_schedule += 1;
        match pcb.status {
            ProcessStatus::Running => {
                pcb.status = ProcessStatus::Ready;
                pcb.ticks_after_schedule = 0;
                self.ready_queue.push_back(current);
            }
            // 还在用它的内核栈，切走之后再回收
            ProcessStatus::Dead => self.pending_reclaim.push(current),
            ProcessStatus::Created | ProcessStatus::Ready => {}
        }
        self.switch_to_next(Some(current), current_sp)
    }

    // 从就绪队列的队头取出下一个进程，切换过去
    fn switch_to_next(&mut self, from: Option<usize>, current_sp: *mut usize) -> Option<ContextSwitch> {
        let next = self.ready_queue.pop_front()?;
        let pcb = self.pool.get_mut(next)?;
        pcb.status = ProcessStatus::Running;
        let next_sp = pcb.kernel_sp;
        let root = pcb.memory_set.as_ref().map(|ms| ms.root_ppn());
        self.current = Some(next);
        if let Some(root) = root {
            self.set_l2_page_table(root);
        }
        match from {
            Some(pid) => debug!("schedule process {} to process {}", pid, next),
            None => debug!("schedule idle to process {}", next),
        }
        Some(ContextSwitch {
            from,
            to: Some(next),
            current_sp,
            next_sp,
        })
    }

    // 回收已经切走的死进程
    fn reap(&mut self) {
        let mut i = 0;
        while i < self.pending_reclaim.len() {
            let pid = self.pending_reclaim[i];
            if Some(pid) == self.current {
                i += 1;
            } else {
                self.pending_reclaim.swap_remove(i);
                self.reclaim(pid);
            }
        }
    }

    // 切换根页表：只替换satp中的物理页号，保留MODE和ASID
    pub fn set_l2_page_table(&mut self, root: PhysPageNum) {
        let satp = satp_with_root(self.hart.satp(), root);
        self.hart.set_satp(satp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{manager_with, program};
    use alloc::vec::Vec;

    fn root_of<A: FrameAllocator, H: Hart>(manager: &ProcessManager<A, H>, pid: usize) -> PhysPageNum {
        manager
            .find_process_by_pid(pid)
            .unwrap()
            .memory_set
            .as_ref()
            .unwrap()
            .root_ppn()
    }

    #[test]
    fn round_robin_requeues_running_process() {
        let mut manager = manager_with(128, 8);
        let pids: Vec<usize> = (0..4u8)
            .map(|i| manager.create_process(&program(i)).unwrap())
            .collect();
        assert_eq!(pids, [0, 1, 2, 3]);
        manager.run_first_process();
        assert_eq!(manager.current_pid(), Some(0));
        assert_eq!(manager.ready_pids(), [1, 2, 3]);

        for _ in 0..4 {
            manager.schedule();
        }
        assert_eq!(
            manager.hart().switches,
            [
                (None, Some(0)),
                (Some(0), Some(1)),
                (Some(1), Some(2)),
                (Some(2), Some(3)),
                (Some(3), Some(0)),
            ]
        );
        assert_eq!(manager.current_pid(), Some(0));
        assert_eq!(manager.ready_pids(), [1, 2, 3]);
        let p0 = manager.find_process_by_pid(0).unwrap();
        assert_eq!(p0.status, ProcessStatus::Running);
        assert_eq!(p0.total_ticks, 1);
        assert_eq!(p0.ticks_after_schedule, 0);
        assert_eq!(
            manager.find_process_by_pid(1).unwrap().status,
            ProcessStatus::Ready
        );
    }

    #[test]
    fn switching_updates_only_the_root_ppn() {
        let mut manager = manager_with(64, 4);
        let initial = manager.hart().satp;
        manager.create_process(&program(1)).unwrap();
        manager.create_process(&program(2)).unwrap();
        manager.run_first_process();
        assert_eq!(manager.hart().satp, satp_with_root(initial, root_of(&manager, 0)));
        manager.schedule();
        let satp = manager.hart().satp;
        assert_eq!(satp >> 44, initial >> 44);
        assert_eq!(PhysPageNum(satp & ((1 << 44) - 1)), root_of(&manager, 1));
    }

    #[test]
    fn empty_ready_queue_keeps_current() {
        let mut manager = manager_with(64, 4);
        // 没有任何进程
        manager.schedule();
        assert!(manager.hart().switches.is_empty());
        manager.create_process(&program(1)).unwrap();
        manager.run_first_process();
        manager.schedule();
        manager.schedule();
        assert_eq!(manager.hart().switches, [(None, Some(0))]);
        assert_eq!(manager.current_pid(), Some(0));
        assert_eq!(manager.find_process_by_pid(0).unwrap().total_ticks, 0);
    }

    #[test]
    fn prepared_switch_points_at_saved_stacks() {
        let mut manager = manager_with(64, 4);
        manager.create_process(&program(1)).unwrap();
        manager.create_process(&program(2)).unwrap();
        let next_sp = manager.find_process_by_pid(0).unwrap().kernel_sp;
        let switch = manager.prepare_schedule().unwrap();
        assert_eq!(switch.from, None);
        assert_eq!(switch.next_sp, next_sp);
        assert_eq!(switch.current_sp, &mut manager.idle_sp as *mut usize);

        let next_sp = manager.find_process_by_pid(1).unwrap().kernel_sp;
        let switch = manager.prepare_schedule().unwrap();
        assert_eq!((switch.from, switch.to), (Some(0), Some(1)));
        assert_eq!(switch.next_sp, next_sp);
        let p0 = manager.pool.get_mut(0).unwrap();
        assert_eq!(switch.current_sp, p0.kernel_sp_ptr());
    }

    #[test]
    fn dead_processes_are_reclaimed_after_switching_away() {
        let mut manager = manager_with(64, 4);
        let baseline = manager.frames().in_use();
        manager.create_process(&program(1)).unwrap();
        let per_process = manager.frames().in_use() - baseline;
        manager.create_process(&program(2)).unwrap();
        manager.run_first_process();

        // 进程0退出：切到进程1，但还不能回收
        manager.exit_current();
        assert_eq!(manager.current_pid(), Some(1));
        assert!(manager.find_process_by_pid(0).is_ok());
        assert_eq!(
            manager.find_process_by_pid(0).unwrap().status,
            ProcessStatus::Dead
        );

        // 下一次调度时回收
        manager.schedule();
        assert!(manager.find_process_by_pid(0).is_err());
        assert!(!manager.pool.is_allocated(0));
        assert_eq!(manager.frames().in_use(), baseline + per_process);
        assert_eq!(manager.all_pids(), [1]);

        // 最后一个进程退出，回到idle控制流
        manager.exit_current();
        assert_eq!(manager.current_pid(), None);
        assert_eq!(manager.hart().switches.last(), Some(&(Some(1), None)));
        manager.schedule();
        assert_eq!(manager.frames().in_use(), baseline);
        assert!(manager.all_pids().is_empty());
        assert!(!manager.pool.is_allocated(1));
        // 槽位可以重新使用
        assert_eq!(manager.create_process(&program(3)), Ok(0));
    }

    #[test]
    fn killing_exited_process_waits_for_reclamation() {
        let mut manager = manager_with(64, 4);
        manager.create_process(&program(1)).unwrap();
        manager.create_process(&program(2)).unwrap();
        manager.run_first_process();
        manager.exit_current();
        assert_eq!(manager.current_pid(), Some(1));

        // 进程0已经死亡，还在等待回收，槽位不能被释放
        assert_eq!(manager.kill(0), Ok(()));
        assert!(manager.pool.is_allocated(0));
        assert_eq!(
            manager.find_process_by_pid(0).unwrap().status,
            ProcessStatus::Dead
        );
        let newcomer = manager.create_process(&program(3)).unwrap();
        assert_eq!(newcomer, 2);

        manager.schedule();
        assert!(manager.find_process_by_pid(0).is_err());
        assert_eq!(manager.all_pids(), [1, 2]);
        assert_eq!(
            manager.find_process_by_pid(newcomer).unwrap().status,
            ProcessStatus::Running
        );
        assert!(manager.pending_reclaim.is_empty());
    }

    #[test]
    fn killed_ready_process_leaves_the_queue() {
        let mut manager = manager_with(64, 4);
        for i in 0..3u8 {
            manager.create_process(&program(i)).unwrap();
        }
        manager.run_first_process();
        manager.kill(1).unwrap();
        assert_eq!(manager.ready_pids(), [2]);
        manager.schedule();
        assert_eq!(manager.hart().switches.last(), Some(&(Some(0), Some(2))));
    }
}
