//! Stack switching between processes.

use crate::processes::registers::ContextSwitch;

// save: *mut Context at [esp + 4], incoming stack pointer at [esp + 8].
// The pushes below produce exactly the `SwitchFrame` layout, read upwards.
core::arch::global_asm!(
    ".global kestrel_switch_context",
    "kestrel_switch_context:",
    "mov eax, [esp + 4]",
    "mov edx, [esp + 8]",
    "pushfd",
    "push ebp",
    "push ebx",
    "push esi",
    "push edi",
    "mov [eax], esp",
    "mov esp, edx",
    "pop edi",
    "pop esi",
    "pop ebx",
    "pop ebp",
    "popfd",
    "ret",
);

extern "C" {
    fn kestrel_switch_context(save: *mut usize, load_stack_pointer: usize);
}

/// Saves the running stack into `switch.save` and resumes `switch.load`.
///
/// Returns only when some later switch loads the saved context again.
///
/// # Safety
///
/// Both contexts must stay alive across the switch, and the incoming stack
/// must hold a `SwitchFrame` (either synthetic or left by a previous switch).
pub unsafe fn switch_context(switch: &ContextSwitch) {
    let load_stack_pointer = (*switch.load).stack_pointer;
    kestrel_switch_context(
        core::ptr::addr_of_mut!((*switch.save).stack_pointer),
        load_stack_pointer,
    );
}
