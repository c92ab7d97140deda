//! Process control blocks and the fixed file-descriptor table.
//!
//! Every schedulable program gets a slot in a small, statically sized pool:
//! there is no dynamic process creation beyond [`MAX_PID`] concurrently live
//! programs (six user programs plus the kernel's own bookkeeping slot, pid
//! 0). Each slot owns a dedicated kernel-stack region used both as the
//! `esp0` target for Ring 3 -> Ring 0 transitions and as the stack the
//! scheduler parks a process on between timer ticks.

use spin::Mutex;

use crate::console::NUM_TERMINALS;

/// Number of process groups (one per virtual terminal).
pub const NUM_PROCESS_GROUPS: usize = NUM_TERMINALS;

/// Maximum number of simultaneously live processes: the kernel's own
/// bookkeeping slot (pid 0) plus six user programs.
pub const MAX_PID: usize = 7;

/// Number of file-descriptor slots per process.
pub const FD_TABLE_SIZE: usize = 8;

/// Size in bytes of the argument buffer copied in by `execute`.
pub const ARGS_BUF_LEN: usize = 128;

/// Size of each process's dedicated kernel-stack slab.
pub const KERNEL_STACK_SIZE: usize = 0x2000;

/// File descriptor slots 0 and 1 are always stdin/stdout and can't be closed.
pub const STDIN_FD: usize = 0;
/// See [`STDIN_FD`].
pub const STDOUT_FD: usize = 1;

/// What kind of backing object a file descriptor refers to.
///
/// Stands in for the original's table of function pointers (one
/// `file_operations` struct per driver): dispatch happens on this tag
/// instead of through a vtable, which keeps `FileDescriptor` a plain `Copy`
/// struct that can live in a fixed-size array without indirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Console input, line-buffered by the owning terminal.
    Stdin,
    /// Console output.
    Stdout,
    /// Virtualized real-time clock.
    Rtc,
    /// Regular file read from the filesystem image.
    Regular,
    /// Directory listing.
    Directory,
}

/// A single entry of a process's file-descriptor table.
#[derive(Debug, Clone, Copy)]
pub struct FileDescriptor {
    /// Whether this slot is currently allocated.
    pub in_use: bool,
    /// What kind of object this descriptor refers to.
    pub kind: FileKind,
    /// Inode number backing a [`FileKind::Regular`] descriptor.
    pub inode: u32,
    /// Current read/seek position within the backing object.
    pub file_position: u32,
}

impl FileDescriptor {
    const EMPTY: Self = Self {
        in_use: false,
        kind: FileKind::Regular,
        inode: 0,
        file_position: 0,
    };
}

/// Fixed-size file-descriptor table carried by every process.
#[derive(Debug, Clone, Copy)]
pub struct FdTable {
    entries: [FileDescriptor; FD_TABLE_SIZE],
}

impl FdTable {
    const fn empty() -> Self {
        Self {
            entries: [FileDescriptor::EMPTY; FD_TABLE_SIZE],
        }
    }

    /// Returns the lowest-numbered free descriptor, skipping the reserved
    /// stdin/stdout slots, or `None` if the table is full.
    #[must_use]
    pub fn allocate(&mut self) -> Option<usize> {
        (2..FD_TABLE_SIZE).find(|&fd| !self.entries[fd].in_use)
    }

    /// Borrows a descriptor slot for inspection or mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if `fd` is out of range or not currently in use.
    pub fn get(&self, fd: usize) -> Result<&FileDescriptor, &'static str> {
        self.entries
            .get(fd)
            .filter(|d| d.in_use)
            .ok_or("fd: not open")
    }

    /// Mutable counterpart of [`FdTable::get`].
    ///
    /// # Errors
    ///
    /// Returns an error if `fd` is out of range or not currently in use.
    pub fn get_mut(&mut self, fd: usize) -> Result<&mut FileDescriptor, &'static str> {
        self.entries
            .get_mut(fd)
            .filter(|d| d.in_use)
            .ok_or("fd: not open")
    }

    /// Opens `fd` as `kind`, bound to `inode` (ignored for non-regular kinds).
    ///
    /// # Errors
    ///
    /// Returns an error if `fd` is out of range.
    pub fn open(&mut self, fd: usize, kind: FileKind, inode: u32) -> Result<(), &'static str> {
        let slot = self.entries.get_mut(fd).ok_or("fd: out of range")?;
        *slot = FileDescriptor {
            in_use: true,
            kind,
            inode,
            file_position: 0,
        };
        Ok(())
    }

    /// Marks `fd` as free again.
    ///
    /// # Errors
    ///
    /// Returns an error if `fd` is out of range or already closed.
    pub fn close(&mut self, fd: usize) -> Result<(), &'static str> {
        let slot = self.get_mut(fd)?;
        *slot = FileDescriptor::EMPTY;
        Ok(())
    }

    fn reset(&mut self) {
        self.entries = [FileDescriptor::EMPTY; FD_TABLE_SIZE];
    }
}

/// A process control block: everything the kernel needs to remember about
/// one running (or parked) program.
pub struct ProcessControlBlock {
    /// Process ID, or `-1` if this slot is free.
    pub pid: i32,
    /// Parent's process ID, or `-1` for the kernel's own bookkeeping slot.
    pub parent_pid: i32,
    /// Value the TSS `esp0` field should hold while this process runs.
    pub tss_esp0: u64,
    /// Open file descriptors.
    pub fd_table: FdTable,
    /// Raw argument string copied in by `execute`, space separated.
    pub args: [u8; ARGS_BUF_LEN],
    /// Number of valid bytes in `args`.
    pub args_len: u8,
    /// Whether this process has mapped the single-page user video buffer.
    pub vid_map_called: bool,
}

impl ProcessControlBlock {
    const fn unused() -> Self {
        Self {
            pid: -1,
            parent_pid: -1,
            tss_esp0: 0,
            fd_table: FdTable::empty(),
            args: [0; ARGS_BUF_LEN],
            args_len: 0,
            vid_map_called: false,
        }
    }

    /// Returns the argument string as UTF-8, lossily falling back to an
    /// empty string on invalid input (arguments are user-controlled bytes).
    #[must_use]
    pub fn args_str(&self) -> &str {
        core::str::from_utf8(&self.args[..self.args_len as usize]).unwrap_or("")
    }
}

#[repr(align(16))]
struct StackSlab([u8; KERNEL_STACK_SIZE]);

static mut KERNEL_STACKS: [StackSlab; MAX_PID] = {
    const ZERO: StackSlab = StackSlab([0; KERNEL_STACK_SIZE]);
    [ZERO; MAX_PID]
};

static PCBS: [Mutex<ProcessControlBlock>; MAX_PID] = {
    const UNUSED: Mutex<ProcessControlBlock> = Mutex::new(ProcessControlBlock::unused());
    [UNUSED; MAX_PID]
};

/// The pid currently running in each process group (virtual terminal).
static ACTIVE_PID: [Mutex<i32>; NUM_PROCESS_GROUPS] = [Mutex::new(-1), Mutex::new(-1), Mutex::new(-1)];

/// Which process group the scheduler is presently dispatching.
static CURRENT_GROUP: Mutex<usize> = Mutex::new(0);

/// Returns the virtual address of the top of `pid`'s kernel-stack slab.
///
/// This is the value loaded into `esp0`/`kernel_esp` when a process has no
/// saved context yet (i.e. is about to be launched for the first time).
///
/// # Panics
///
/// Panics if `pid` is not a valid process slot index.
#[must_use]
pub fn kernel_stack_top(pid: usize) -> u64 {
    assert!(pid < MAX_PID, "pid out of range");
    // SAFETY: we only ever take the address of the static, never alias it.
    let base = unsafe { (&raw const KERNEL_STACKS[pid]) as u64 };
    base + KERNEL_STACK_SIZE as u64
}

/// Returns the process group currently being serviced by the scheduler.
#[must_use]
pub fn current_group() -> usize {
    *CURRENT_GROUP.lock()
}

/// Sets the process group currently being serviced by the scheduler.
pub fn set_current_group(group: usize) {
    assert!(group < NUM_PROCESS_GROUPS, "group out of range");
    *CURRENT_GROUP.lock() = group;
}

/// Returns the pid of the leaf (most deeply nested) process in `group`, or
/// `None` if the group has no process running yet.
#[must_use]
pub fn active_pid(group: usize) -> Option<usize> {
    let pid = *ACTIVE_PID[group].lock();
    (pid >= 0).then_some(pid as usize)
}

/// Returns the PCB of the process currently running in the scheduler's
/// active group.
///
/// # Panics
///
/// Panics if the active group has no process running (should never happen
/// once the three boot shells are spawned).
pub fn current() -> spin::MutexGuard<'static, ProcessControlBlock> {
    let group = current_group();
    let pid = active_pid(group).expect("no active process in current group");
    PCBS[pid].lock()
}

/// Borrows the PCB for an arbitrary pid.
///
/// # Panics
///
/// Panics if `pid` is out of range.
pub fn get(pid: usize) -> spin::MutexGuard<'static, ProcessControlBlock> {
    assert!(pid < MAX_PID, "pid out of range");
    PCBS[pid].lock()
}

/// Finds the lowest-numbered process slot not currently in use.
#[must_use]
pub fn allocate_pid() -> Option<usize> {
    (0..MAX_PID).find(|&pid| PCBS[pid].lock().pid < 0)
}

/// Initializes pid 0, the kernel's own bookkeeping slot, for process group
/// `group`. Gives every group's first shell a parent to inherit stdin/stdout
/// from.
pub fn init_kernel_slot(group: usize) {
    *ACTIVE_PID[group].lock() = 0;
    let mut pcb = PCBS[0].lock();
    pcb.pid = 0;
    pcb.parent_pid = -1;
    pcb.fd_table.reset();
    let _ = pcb.fd_table.open(STDIN_FD, FileKind::Stdin, 0);
    let _ = pcb.fd_table.open(STDOUT_FD, FileKind::Stdout, 0);
    pcb.args_len = 0;
}

/// Claims `child_pid` for a newly `execute`d program in the currently
/// scheduled group, inheriting stdin/stdout and recording the caller as
/// parent.
///
/// # Errors
///
/// Returns an error if `child_pid` is out of range.
pub fn setup(child_pid: usize) -> Result<(), &'static str> {
    if child_pid >= MAX_PID {
        return Err("pcb: pid out of range");
    }
    let group = current_group();
    let parent_pid = active_pid(group).map_or(-1, |p| p as i32);
    *ACTIVE_PID[group].lock() = child_pid as i32;

    let mut pcb = PCBS[child_pid].lock();
    *pcb = ProcessControlBlock::unused();
    pcb.pid = child_pid as i32;
    pcb.parent_pid = parent_pid;
    let _ = pcb.fd_table.open(STDIN_FD, FileKind::Stdin, 0);
    let _ = pcb.fd_table.open(STDOUT_FD, FileKind::Stdout, 0);
    Ok(())
}

/// Closes every open descriptor for the current process, frees its pid
/// slot, and restores the group's active pid to the parent.
///
/// Returns the parent's pid so the syscall layer can resume it.
pub fn teardown() -> i32 {
    let group = current_group();
    let pid = active_pid(group).expect("teardown with no active process") as usize;

    {
        let mut pcb = PCBS[pid].lock();
        for fd in 0..FD_TABLE_SIZE {
            let _ = pcb.fd_table.close(fd);
        }
    }

    let parent_pid = {
        let mut pcb = PCBS[pid].lock();
        pcb.pid = -1;
        pcb.parent_pid
    };

    *ACTIVE_PID[group].lock() = parent_pid;
    parent_pid
}

/// Per-pid scheduler stack pointer, separate from the `Mutex`-guarded PCB
/// table: the scheduler's context switch itself disables interrupts and
/// never reenters, so a plain array (rather than a lock it could deadlock
/// against) is the stable storage the raw pointer in [`context_esp_slot`]
/// needs.
static mut KERNEL_CONTEXT_ESP: [u64; MAX_PID] = [0; MAX_PID];

/// Per-pid kernel stack pointer captured by `execute` just before dropping
/// into the child's ring-3 entry, and restored by `halt` to resume the
/// parent exactly where its `execute` syscall left off.
static mut USER_CONTEXT_ESP: [u64; MAX_PID] = [0; MAX_PID];

/// Returns a raw pointer to `pid`'s saved execute/halt resume point.
///
/// # Safety
///
/// Callers must only dereference this from the syscall layer, which never
/// lets two pids race on the same slot (a pid is always suspended inside
/// exactly one pending `execute` call at a time).
#[must_use]
pub fn user_context_esp_slot(pid: usize) -> *mut u64 {
    assert!(pid < MAX_PID, "pid out of range");
    // SAFETY: see doc comment.
    unsafe { &raw mut USER_CONTEXT_ESP[pid] }
}

/// Returns `pid`'s saved execute/halt resume point.
#[must_use]
pub fn user_context_esp(pid: usize) -> u64 {
    // SAFETY: see `user_context_esp_slot`'s doc comment.
    unsafe { USER_CONTEXT_ESP[pid] }
}

/// Returns a raw pointer to `pid`'s saved scheduler stack pointer, for the
/// scheduler to write the suspended rsp into as it switches away from it.
///
/// # Safety
///
/// Callers must only dereference the returned pointer from within the
/// scheduler's single-threaded context-switch path, with interrupts
/// disabled, never concurrently with another access to the same pid's slot.
#[must_use]
pub fn context_esp_slot(pid: usize) -> *mut u64 {
    assert!(pid < MAX_PID, "pid out of range");
    // SAFETY: see doc comment.
    unsafe { &raw mut KERNEL_CONTEXT_ESP[pid] }
}

/// Returns `pid`'s saved scheduler stack pointer, to resume onto.
#[must_use]
pub fn context_esp(pid: usize) -> u64 {
    // SAFETY: read-only snapshot; actual synchronization is "interrupts
    // disabled while the scheduler runs".
    unsafe { KERNEL_CONTEXT_ESP[pid] }
}

/// Writes a bootstrap stack frame for `pid` so that the next scheduler
/// switch onto it starts execution at `entry` with a freshly zeroed set of
/// callee-saved registers, as if it had already run once and yielded.
///
/// # Panics
///
/// Panics if `pid` is not a valid process slot index.
pub fn prepare_initial_stack(pid: usize, entry: extern "C" fn() -> !) {
    let top = kernel_stack_top(pid);
    // Layout matches `scheduler::switch_context`'s pop sequence: the
    // innermost value on the stack is treated as a return address.
    let mut sp = top;
    sp -= 8;
    // SAFETY: `sp` lies within `pid`'s private kernel-stack slab, which is
    // otherwise unused until this process is first scheduled.
    unsafe {
        core::ptr::write(sp as *mut u64, entry as usize as u64);
    }
    for _ in 0..6 {
        sp -= 8;
        // SAFETY: same stack slab as above.
        unsafe {
            core::ptr::write(sp as *mut u64, 0u64);
        }
    }
    // SAFETY: see `KERNEL_CONTEXT_ESP`'s doc comment.
    unsafe {
        KERNEL_CONTEXT_ESP[pid] = sp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_fd_table_reserves_stdin_stdout() {
        let mut table = FdTable::empty();
        assert!(table.get(STDIN_FD).is_err(), "stdin starts closed");
        table
            .open(STDIN_FD, FileKind::Stdin, 0)
            .expect("open should succeed");
        assert!(table.get(STDIN_FD).is_ok());
        assert_eq!(table.allocate(), Some(2), "first free fd after stdin/stdout is 2");
    }

    #[test_case]
    fn test_fd_table_close_frees_slot() {
        let mut table = FdTable::empty();
        table.open(2, FileKind::Regular, 5).expect("open");
        assert_eq!(table.allocate(), Some(3));
        table.close(2).expect("close");
        assert_eq!(table.allocate(), Some(2), "closed slot is reused");
    }

    #[test_case]
    fn test_fd_table_rejects_double_close() {
        let mut table = FdTable::empty();
        table.open(2, FileKind::Regular, 0).expect("open");
        table.close(2).expect("close");
        assert!(table.close(2).is_err(), "closing twice must fail");
    }
}
