//! The synchronous system-call gate: `int 0x80` with `rdi`/`rsi`/`rdx`/`rcx`
//! carrying the syscall number and up to three arguments, and `rax` carrying
//! the return value, same convention the naked `int 0x80` entry point this
//! module replaces already used. The eight call numbers below (`halt`
//! through `vidmap`) line up with the process-management, console, and
//! filesystem operations the rest of the kernel exposes.

use core::arch::naked_asm;
use core::sync::atomic::{AtomicU64, Ordering};

use x86_64::{
    structures::idt::InterruptDescriptorTable,
    structures::paging::PageTableFlags,
    PrivilegeLevel, VirtAddr,
};

use crate::{console, fs, gdt, memory, pic, process, rtc};

/// Interrupt vector number used for syscalls (`int 0x80`).
pub const SYSCALL_INTERRUPT_INDEX: u8 = 0x80;

pub const SYS_HALT: u64 = 1;
pub const SYS_EXECUTE: u64 = 2;
pub const SYS_READ: u64 = 3;
pub const SYS_WRITE: u64 = 4;
pub const SYS_OPEN: u64 = 5;
pub const SYS_CLOSE: u64 = 6;
pub const SYS_GETARGS: u64 = 7;
pub const SYS_VIDMAP: u64 = 8;

/// Every executable must start with these four bytes; anything else is
/// rejected by `execute` before any memory is mapped for it.
const MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Value returned to a caller whose syscall number isn't recognized, or
/// whose arguments fail validation.
const SYSCALL_ERROR: u64 = u64::MAX;

/// Scratch handoff from [`sys_halt`] to [`syscall_entry`]'s epilogue: the
/// kernel stack pointer the parent should resume on. Populated fresh by
/// every `halt` dispatch, so there's no cross-process race as long as at
/// most one `int 0x80` is ever being unwound at a time (true on a single
/// core with interrupts disabled for the duration of the handler).
static RESUME_RSP: AtomicU64 = AtomicU64::new(0);

/// Registers the syscall interrupt handler in the IDT with `DPL = Ring 3`
/// so user-mode code can invoke it directly.
pub fn register(idt: &mut InterruptDescriptorTable) {
    let entry = &mut idt[usize::from(SYSCALL_INTERRUPT_INDEX)];
    // SAFETY: `syscall_entry` fully manages register save/restore and the
    // `iretq`/resume epilogue itself.
    unsafe {
        let handler_addr = VirtAddr::new(syscall_entry as *const () as u64);
        entry
            .set_handler_addr(handler_addr)
            .set_privilege_level(PrivilegeLevel::Ring3);
    }
}

/// Naked `int 0x80` entry point. Saves every general-purpose register,
/// marshals the syscall number and three arguments into the System V
/// calling convention, and dispatches to [`syscall_dispatch`].
///
/// A `SYS_HALT` dispatch never falls back through to `iretq`: instead it
/// switches straight onto the resuming parent's saved kernel stack (see
/// [`RESUME_RSP`]) and `ret`s into that parent's own suspended `execute`
/// call, the same way [`sys_execute`] resumes when its child finally runs.
#[unsafe(naked)]
pub(crate) extern "x86-interrupt" fn syscall_entry(_frame: x86_64::structures::idt::InterruptStackFrame) {
    // SAFETY: see module and function docs; register layout mirrors the
    // pushes immediately below.
    naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, [rsp + 0x70]", // saved rax -> syscall number
        "mov rsi, [rsp + 0x48]", // saved rdi -> arg1
        "mov rdx, [rsp + 0x50]", // saved rsi -> arg2
        "mov rcx, [rsp + 0x58]", // saved rdx -> arg3
        "call {dispatch}",
        "mov rcx, {sentinel}",
        "cmp rax, rcx",
        "je 2f",
        "mov [rsp + 0x70], rax",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "iretq",
        "2:",
        "mov rsp, [{resume_rsp}]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "xor ax, ax",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "ret",
        dispatch = sym syscall_dispatch,
        resume_rsp = sym RESUME_RSP,
        sentinel = const HALT_SENTINEL,
    );
}

/// Returned by [`syscall_dispatch`] to tell the naked epilogue to take the
/// resume-onto-parent path instead of `iretq`.
const HALT_SENTINEL: u64 = u64::MAX - 1;

extern "C" fn syscall_dispatch(num: u64, arg1: u64, arg2: u64, arg3: u64) -> u64 {
    match num {
        SYS_HALT => sys_halt(arg1),
        SYS_EXECUTE => sys_execute(arg1),
        SYS_READ => sys_read(arg1, arg2, arg3),
        SYS_WRITE => sys_write(arg1, arg2, arg3),
        SYS_OPEN => sys_open(arg1),
        SYS_CLOSE => sys_close(arg1),
        SYS_GETARGS => sys_getargs(arg1, arg2),
        SYS_VIDMAP => sys_vidmap(arg1),
        _ => SYSCALL_ERROR,
    }
}

fn user_range_ok(ptr: u64, len: u64) -> Option<&'static [u8]> {
    let end = ptr.checked_add(len)?;
    if ptr < memory::USER_CODE_VIRT_BASE || end > memory::USER_CODE_VIRT_BASE + memory::PROGRAM_WINDOW_PAGES * 4096 {
        return None;
    }
    // SAFETY: the range was just checked against the mapped program window
    // for the currently active process.
    Some(unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) })
}

fn user_range_ok_mut(ptr: u64, len: u64) -> Option<&'static mut [u8]> {
    let end = ptr.checked_add(len)?;
    if ptr < memory::USER_CODE_VIRT_BASE || end > memory::USER_CODE_VIRT_BASE + memory::PROGRAM_WINDOW_PAGES * 4096 {
        return None;
    }
    // SAFETY: see `user_range_ok`.
    Some(unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len as usize) })
}

/// `halt(status)`: tears down the calling process and resumes its parent's
/// suspended `execute` call with `status` as the return value.
fn sys_halt(status: u64) -> u64 {
    let group = process::current_group();
    let child_pid = process::active_pid(group).expect("halt with no active process");
    memory::teardown_program_window(child_pid);
    let parent_pid = process::teardown();

    if parent_pid < 0 {
        // The group's last (boot shell) process exited; nothing left to
        // resume onto. This never happens for the three static shells,
        // which never halt, but is guarded rather than assumed.
        crate::hlt_loop();
    }

    let resume = process::user_context_esp(parent_pid as usize);
    RESUME_RSP.store(resume, Ordering::SeqCst);
    // The halt status is smuggled back to the parent's `execute` call site
    // as the value left in `rax` by the naked epilogue's `ret`.
    status & 0xFF
}

/// Tears down the process running in the currently scheduled group and
/// resumes its parent's suspended `execute` call with `status`, the way a
/// CPU exception forces an implicit `halt` on the program that faulted.
///
/// Unlike [`sys_halt`], this is reached directly from an exception handler
/// rather than through [`syscall_entry`]'s naked dispatch, so it performs
/// the stack swap and resume itself via [`resume_into_parent`] instead of
/// returning a sentinel for that asm to act on. Diverges into the kernel
/// halt loop if the faulting group has no process, or no parent left to
/// resume onto.
pub fn force_halt(status: u64) -> ! {
    let group = process::current_group();
    let Some(child_pid) = process::active_pid(group) else {
        crate::hlt_loop();
    };
    memory::teardown_program_window(child_pid);
    let parent_pid = process::teardown();
    if parent_pid < 0 {
        crate::hlt_loop();
    }

    let resume = process::user_context_esp(parent_pid as usize);
    // SAFETY: `resume` was captured by `enter_user_mode` for this exact
    // parent pid and points at a frame built by that function's prologue.
    unsafe { resume_into_parent(resume, status & 0xFF) }
}

/// Switches onto a parent's saved `execute` stack and `ret`s into it,
/// mirroring the tail of [`syscall_entry`]'s naked epilogue for callers that
/// aren't themselves reached through that entry point.
///
/// # Safety
///
/// `resume_rsp` must be a value previously written by [`enter_user_mode`]'s
/// prologue for a parent that is still suspended inside its `execute` call.
#[unsafe(naked)]
unsafe extern "C" fn resume_into_parent(_resume_rsp: u64, _status: u64) -> ! {
    naked_asm!(
        "mov rax, rsi",
        "mov rsp, rdi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "ret",
    );
}

/// `execute(command)`: parses `command` as `"program arg0 arg1 ..."`,
/// validates the program's magic header, loads it into a fresh program
/// window, and drops into Ring 3. Blocks (from the calling process's point
/// of view) until the child halts.
fn sys_execute(command_ptr: u64) -> u64 {
    let Some(command) = user_range_ok(command_ptr, process::ARGS_BUF_LEN as u64) else {
        return SYSCALL_ERROR;
    };
    let command_len = command.iter().position(|&b| b == 0).unwrap_or(command.len());
    let Ok(command_str) = core::str::from_utf8(&command[..command_len]) else {
        return SYSCALL_ERROR;
    };

    let command_str = command_str.trim_start();
    if command_str.is_empty() {
        return SYSCALL_ERROR;
    }
    let mut tokens = command_str.split_whitespace();
    let Some(program_name) = tokens.next() else {
        return SYSCALL_ERROR;
    };
    let (args, args_len) = join_args(tokens);

    let Some(child_pid) = process::allocate_pid() else {
        return SYSCALL_ERROR;
    };

    if process::setup(child_pid).is_err() {
        return SYSCALL_ERROR;
    }
    {
        let mut pcb = process::get(child_pid);
        pcb.args = args;
        pcb.args_len = args_len;
    }

    if load_image(child_pid, program_name).is_err() {
        memory::teardown_program_window(child_pid);
        process::teardown();
        return SYSCALL_ERROR;
    }

    let parent_group = process::current_group();
    let parent_pid = process::active_pid(parent_group).unwrap_or(0);

    gdt::set_kernel_stack(process::kernel_stack_top(child_pid));

    let user_cs = gdt::user_code_selector();
    let user_ds = gdt::user_data_selector();
    let stack_top = memory::USER_CODE_VIRT_BASE + memory::PROGRAM_WINDOW_PAGES * 4096;

    // SAFETY: the program window and stack are mapped, the GDT holds valid
    // Ring 3 selectors, and esp0 now points at the child's own kernel stack.
    unsafe {
        enter_user_mode(
            memory::USER_CODE_VIRT_BASE + MAGIC.len() as u64,
            stack_top,
            u64::from(user_cs.0),
            u64::from(user_ds.0),
            process::user_context_esp_slot(parent_pid),
        );
    }

    // Reached only once this child eventually halts and the resume path
    // above in `syscall_entry` rets back here; `rax` at that point already
    // carries the child's exit status thanks to the System V return-value
    // register, which the compiler reads out for us.
    0
}

/// Keeps at most the first three whitespace-separated tokens from `tokens`
/// and rejoins them with single spaces into a fixed-size argument buffer,
/// dropping a fourth token onward.
fn join_args<'a>(tokens: impl Iterator<Item = &'a str>) -> ([u8; process::ARGS_BUF_LEN], u8) {
    let mut args = [0u8; process::ARGS_BUF_LEN];
    let mut pos = 0usize;
    for (i, token) in tokens.take(3).enumerate() {
        if i > 0 && pos < process::ARGS_BUF_LEN {
            args[pos] = b' ';
            pos += 1;
        }
        let copy_len = core::cmp::min(token.len(), process::ARGS_BUF_LEN - pos);
        args[pos..pos + copy_len].copy_from_slice(&token.as_bytes()[..copy_len]);
        pos += copy_len;
    }
    (args, pos as u8)
}

/// Validates `program_name` against the filesystem image and loads its
/// bytes into `child_pid`'s freshly mapped program window. Shared between
/// [`sys_execute`] and [`enter_initial_shell`], the only two places that
/// ever bring a new program into memory.
fn load_image(child_pid: usize, program_name: &str) -> Result<(), &'static str> {
    let image = crate::FILESYSTEM_IMAGE.get().ok_or("syscall: no filesystem image")?;
    let filesystem = fs::Filesystem::new(image)?;
    let dentry = filesystem
        .dentry_by_name(program_name)
        .ok_or("syscall: program not found")?;
    if dentry.kind != process::FileKind::Regular {
        return Err("syscall: not a regular file");
    }

    let mut header = [0u8; 4];
    if filesystem.read_data(dentry.inode_num, 0, &mut header).unwrap_or(0) < 4 || header != MAGIC {
        return Err("syscall: bad magic header");
    }

    let file_len = filesystem.file_length(dentry.inode_num)?;
    if u64::from(file_len) > memory::PROGRAM_WINDOW_PAGES * 4096 {
        return Err("syscall: program larger than its window");
    }

    memory::load_program_window(child_pid)?;

    // SAFETY: `load_program_window` just mapped this window writable for
    // exactly this purpose, and `file_len` was checked against its size.
    let dest = unsafe {
        core::slice::from_raw_parts_mut(memory::USER_CODE_VIRT_BASE as *mut u8, file_len as usize)
    };
    if filesystem.read_data(dentry.inode_num, 0, dest).unwrap_or(0) != file_len as usize {
        return Err("syscall: short read loading program");
    }
    Ok(())
}

/// Maps and enters the boot-time shell for one of the three process groups.
///
/// Called only as a [`process::prepare_initial_stack`] trampoline, so it
/// runs the first time its pid is ever scheduled, with the scheduler having
/// already pointed `esp0` and the program window at this exact pid. It never
/// returns: a shell that can't be loaded just parks its group in the idle
/// loop instead of taking down the whole machine.
pub fn enter_initial_shell(pid: usize) -> ! {
    if load_image(pid, "shell").is_err() {
        crate::hlt_loop();
    }

    let user_cs = gdt::user_code_selector();
    let user_ds = gdt::user_data_selector();
    let stack_top = memory::USER_CODE_VIRT_BASE + memory::PROGRAM_WINDOW_PAGES * 4096;

    // SAFETY: `load_image` just mapped and populated this pid's program
    // window; the save slot is this pid's own and is never read back, since
    // the three boot shells are never resumed into by a `halt`.
    unsafe {
        enter_user_mode(
            memory::USER_CODE_VIRT_BASE + MAGIC.len() as u64,
            stack_top,
            u64::from(user_cs.0),
            u64::from(user_ds.0),
            process::user_context_esp_slot(pid),
        );
    }
    crate::hlt_loop();
}

/// Loads and runs `program_name` in a fresh process, blocking the caller
/// until it halts, the same way [`sys_execute`] blocks a shell that calls
/// `execute`. Exposed for integration tests and diagnostic harnesses that
/// want to drive the loader/syscall gate directly from Ring 0 rather than
/// through an actual `int 0x80` from Ring 3.
///
/// # Errors
///
/// Returns an error if no pid is free or the program can't be loaded.
pub fn execute_sync(program_name: &str) -> Result<(), &'static str> {
    let child_pid = process::allocate_pid().ok_or("syscall: no free pid")?;
    let parent_group = process::current_group();
    let parent_pid = process::active_pid(parent_group).unwrap_or(0);

    process::setup(child_pid)?;
    if let Err(err) = load_image(child_pid, program_name) {
        memory::teardown_program_window(child_pid);
        process::teardown();
        return Err(err);
    }

    gdt::set_kernel_stack(process::kernel_stack_top(child_pid));
    let user_cs = gdt::user_code_selector();
    let user_ds = gdt::user_data_selector();
    let stack_top = memory::USER_CODE_VIRT_BASE + memory::PROGRAM_WINDOW_PAGES * 4096;

    // SAFETY: same preconditions as `sys_execute`: the program window and
    // stack are mapped, the GDT holds valid Ring 3 selectors, and esp0
    // points at the child's own kernel stack.
    unsafe {
        enter_user_mode(
            memory::USER_CODE_VIRT_BASE + MAGIC.len() as u64,
            stack_top,
            u64::from(user_cs.0),
            u64::from(user_ds.0),
            process::user_context_esp_slot(parent_pid),
        );
    }
    Ok(())
}

/// Performs the Ring 0 -> Ring 3 transition, saving the resume point into
/// `*save_slot` first.
///
/// # Safety
///
/// Same preconditions as the original `switch_to_user_mode`: a fully mapped
/// and runnable user program, valid Ring 3 selectors, and a valid `esp0`.
#[unsafe(naked)]
unsafe extern "C" fn enter_user_mode(
    _entry_point: u64,
    _user_stack: u64,
    _user_cs: u64,
    _user_ds: u64,
    _save_slot: *mut u64,
) {
    naked_asm!(
        "push rbx",
        "push rbp",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [r8], rsp",
        "mov ax, cx",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "push rax",
        "push rsi",
        "pushfq",
        "pop r11",
        "or r11, 0x200",
        "push r11",
        "push rdx",
        "push rdi",
        "iretq",
    );
}

/// `read(fd, buf, nbytes)`.
fn sys_read(fd: u64, buf_ptr: u64, nbytes: u64) -> u64 {
    let Some(buf) = user_range_ok_mut(buf_ptr, nbytes) else {
        return SYSCALL_ERROR;
    };
    let fd = fd as usize;
    let group = process::current_group();
    let kind = {
        let pcb = process::current();
        match pcb.fd_table.get(fd) {
            Ok(descriptor) => descriptor.kind,
            Err(_) => return SYSCALL_ERROR,
        }
    };

    match kind {
        process::FileKind::Stdin => console::read(group, buf) as u64,
        process::FileKind::Rtc => {
            rtc::read(group);
            0
        }
        process::FileKind::Regular => {
            let Some(image) = crate::FILESYSTEM_IMAGE.get() else {
                return SYSCALL_ERROR;
            };
            let Ok(filesystem) = fs::Filesystem::new(image) else {
                return SYSCALL_ERROR;
            };
            let mut pcb = process::current();
            let Ok(descriptor) = pcb.fd_table.get_mut(fd) else {
                return SYSCALL_ERROR;
            };
            match filesystem.read_data(descriptor.inode, descriptor.file_position, buf) {
                Ok(n) => {
                    descriptor.file_position += n as u32;
                    n as u64
                }
                Err(_) => SYSCALL_ERROR,
            }
        }
        process::FileKind::Directory => {
            let Some(image) = crate::FILESYSTEM_IMAGE.get() else {
                return SYSCALL_ERROR;
            };
            let Ok(filesystem) = fs::Filesystem::new(image) else {
                return SYSCALL_ERROR;
            };
            let mut pcb = process::current();
            let Ok(descriptor) = pcb.fd_table.get_mut(fd) else {
                return SYSCALL_ERROR;
            };
            // The directory cursor rides in `file_position`: each `read`
            // returns the next entry's name and advances to the one after.
            let index = descriptor.file_position as usize;
            let Some(dentry) = filesystem.dentry_by_index(index) else {
                return 0;
            };
            let name = dentry.name().as_bytes();
            let copy_len = core::cmp::min(name.len(), buf.len());
            buf[..copy_len].copy_from_slice(&name[..copy_len]);
            descriptor.file_position += 1;
            copy_len as u64
        }
        process::FileKind::Stdout => SYSCALL_ERROR,
    }
}

/// `write(fd, buf, nbytes)`.
fn sys_write(fd: u64, buf_ptr: u64, nbytes: u64) -> u64 {
    let Some(buf) = user_range_ok(buf_ptr, nbytes) else {
        return SYSCALL_ERROR;
    };
    let fd = fd as usize;
    let group = process::current_group();
    let kind = {
        let pcb = process::current();
        match pcb.fd_table.get(fd) {
            Ok(descriptor) => descriptor.kind,
            Err(_) => return SYSCALL_ERROR,
        }
    };

    match kind {
        process::FileKind::Stdout => console::write(group, buf) as u64,
        process::FileKind::Rtc => {
            if buf.len() != 4 {
                return SYSCALL_ERROR;
            }
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&buf[..4]);
            let rate = u32::from_ne_bytes(raw);
            match rtc::write(group, rate) {
                Ok(()) => 0,
                Err(_) => SYSCALL_ERROR,
            }
        }
        _ => SYSCALL_ERROR,
    }
}

/// `open(filename)`.
fn sys_open(name_ptr: u64) -> u64 {
    let Some(name_bytes) = user_range_ok(name_ptr, fs::FILENAME_LEN as u64) else {
        return SYSCALL_ERROR;
    };
    let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
    let Ok(name) = core::str::from_utf8(&name_bytes[..name_len]) else {
        return SYSCALL_ERROR;
    };

    if name == "rtc" {
        let mut pcb = process::current();
        let Some(fd) = pcb.fd_table.allocate() else {
            return SYSCALL_ERROR;
        };
        let group = process::current_group();
        rtc::open(group);
        let _ = pcb.fd_table.open(fd, process::FileKind::Rtc, 0);
        return fd as u64;
    }

    let Some(image) = crate::FILESYSTEM_IMAGE.get() else {
        return SYSCALL_ERROR;
    };
    let Ok(filesystem) = fs::Filesystem::new(image) else {
        return SYSCALL_ERROR;
    };
    let Some(dentry) = filesystem.dentry_by_name(name) else {
        return SYSCALL_ERROR;
    };

    let mut pcb = process::current();
    let Some(fd) = pcb.fd_table.allocate() else {
        return SYSCALL_ERROR;
    };
    let _ = pcb.fd_table.open(fd, dentry.kind, dentry.inode_num);
    fd as u64
}

/// `close(fd)`.
fn sys_close(fd: u64) -> u64 {
    let fd = fd as usize;
    if fd == process::STDIN_FD || fd == process::STDOUT_FD {
        return SYSCALL_ERROR;
    }
    let mut pcb = process::current();
    match pcb.fd_table.close(fd) {
        Ok(()) => 0,
        Err(_) => SYSCALL_ERROR,
    }
}

/// `getargs(buf, nbytes)`: copies the calling process's argument string.
fn sys_getargs(buf_ptr: u64, nbytes: u64) -> u64 {
    let Some(buf) = user_range_ok_mut(buf_ptr, nbytes) else {
        return SYSCALL_ERROR;
    };
    let pcb = process::current();
    let args = pcb.args_str().as_bytes();
    if args.len() >= buf.len() {
        return SYSCALL_ERROR;
    }
    buf[..args.len()].copy_from_slice(args);
    buf[args.len()] = 0;
    0
}

/// `vidmap(screen_start)`: maps a single page of video memory into the
/// calling process and writes its virtual address out through
/// `screen_start`.
fn sys_vidmap(screen_start_ptr: u64) -> u64 {
    let Some(out) = user_range_ok_mut(screen_start_ptr, 8) else {
        return SYSCALL_ERROR;
    };

    {
        let mut pcb = process::current();
        pcb.vid_map_called = true;
    }

    let group = process::current_group();
    let pid = process::active_pid(group).expect("vidmap with no active process");
    memory::sync_vidmap_mapping(pid, group);

    out.copy_from_slice(&memory::USER_VIDMAP_VIRT.to_le_bytes());
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_unknown_syscall_returns_error() {
        assert_eq!(syscall_dispatch(999, 0, 0, 0), SYSCALL_ERROR);
    }

    #[test_case]
    fn test_join_args_keeps_at_most_three_tokens() {
        let (args, len) = join_args(["one", "two", "three", "four"].into_iter());
        assert_eq!(&args[..len as usize], b"one two three");
    }

    #[test_case]
    fn test_join_args_handles_no_arguments() {
        let (_, len) = join_args(core::iter::empty());
        assert_eq!(len, 0);
    }

    #[test_case]
    fn test_user_range_rejects_out_of_window() {
        assert!(user_range_ok(0, 10).is_none());
        assert!(user_range_ok(memory::USER_CODE_VIRT_BASE + memory::PROGRAM_WINDOW_PAGES * 4096, 1).is_none());
    }
}
