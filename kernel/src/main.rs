#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;

use kestrel::{
    arch,
    boot::BootInfo,
    constants::{
        memory::{KERNEL_VIRTUAL_BASE, LOW_MEMORY_LIMIT},
        processes::DEFAULT_STACK_SIZE,
        timer::TIMER_FREQUENCY,
    },
    devices, idle_loop, interrupts, logging,
    memory::{
        self,
        frame_allocator::{alloc_frame, dealloc_frame},
        heap::{kalloc, kfree, ALLOCATOR},
        paging::PhysicalWindow,
        KernelImage,
    },
    processes::{self, scheduler},
    serial_println,
    syscalls::{self, mmap::ProtFlags},
    timer,
};

fn sleep_ms(ms: u64) {
    let deadline = timer::time_ms() + ms;
    while timer::time_ms() < deadline {
        arch::halt();
    }
}

extern "C" fn counter_process() {
    let pid = scheduler::current_pid().unwrap_or_default();
    for round in 0..5 {
        log::info!("process {}: round {}", pid, round);
        sleep_ms(500);
    }
    log::info!("process {}: done", pid);
}

extern "C" fn uptime_process() {
    loop {
        log::info!("uptime {} s", timer::time_seconds());
        scheduler::log_process_table();
        sleep_ms(3000);
    }
}

/// Allocates and frees a few blocks, printing the heap after each step.
fn heap_self_test() {
    let status = |label: &str| {
        log::info!("heap after {}:", label);
        arch::without_interrupts(|| ALLOCATOR.lock().log_status());
    };

    let a = kalloc(64).expect("kalloc(64) failed");
    let b = kalloc(128).expect("kalloc(128) failed");
    let c = kalloc(256).expect("kalloc(256) failed");
    log::info!("a = {:p}, b = {:p}, c = {:p}", a, b, c);
    status("allocating a, b, c");

    for (label, ptr) in [("freeing b", b), ("freeing a", a), ("freeing c", c)] {
        if let Err(error) = kfree(ptr.as_ptr()) {
            log::error!("{}: {}", label, error);
        }
        status(label);
    }
}

/// Maps a page through the system call path and touches it.
fn mmap_self_test() {
    let addr = syscalls::mmap(0x4000_0000, 0x1000, ProtFlags::READ | ProtFlags::WRITE);
    if addr.is_null() {
        log::error!("mmap failed");
        return;
    }
    let word = addr.cast::<u32>();
    unsafe { word.write_volatile(0xDEAD_BEEF) };
    log::info!(
        "mmap: {:p} holds {:#010x}",
        addr,
        unsafe { word.read_volatile() }
    );
}

fn frame_self_test() {
    let Some(frame) = alloc_frame() else {
        log::error!("no free physical frames");
        return;
    };
    log::info!("allocated frame {:#010x}", frame);
    if let Err(error) = dealloc_frame(frame) {
        log::error!("{}", error);
    }
}

#[no_mangle]
extern "C" fn kmain(magic: u32, info_phys: u32) -> ! {
    devices::init();
    logging::init();
    serial_println!("Booting kestrel...");

    let window = PhysicalWindow::new(KERNEL_VIRTUAL_BASE as usize, LOW_MEMORY_LIMIT);
    let boot_info = match unsafe { BootInfo::from_multiboot(magic, info_phys, window) } {
        Ok(info) => info,
        Err(error) => panic!("Error: {}", error),
    };
    boot_info.log_memory_map();

    arch::x86::gdt::init();
    interrupts::init();
    syscalls::init();
    memory::init(&boot_info, KernelImage::from_linker());
    frame_self_test();
    heap_self_test();
    mmap_self_test();

    processes::init();
    for entry in [counter_process as extern "C" fn(), counter_process, uptime_process] {
        if let Err(error) = scheduler::spawn(entry, DEFAULT_STACK_SIZE) {
            log::error!("Failed to spawn process: {}", error);
        }
    }

    timer::init(TIMER_FREQUENCY);

    log::info!("Boot complete, entering idle loop");
    idle_loop();
}

#[panic_handler]
fn rust_panic(info: &PanicInfo) -> ! {
    arch::disable_interrupts();
    serial_println!("Kernel panic: {}", info);
    loop {
        arch::halt();
    }
}
