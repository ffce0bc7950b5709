//! Interrupt entry stubs.
//!
//! Every stub leaves the same image on the stack (see `InterruptFrame`):
//! vector and error code on top of what the CPU pushed, then `pushad`.
//! Exceptions that push no error code get a zero so the layout never varies.

use crate::constants::idt::{STUB_TABLE_LEN, SYSCALL_VECTOR};

core::arch::global_asm!(
    r#"
.macro isr_without_error num
isr_stub_\num:
    push 0
    push \num
    jmp isr_common
.endm

.macro isr_with_error num
isr_stub_\num:
    push \num
    jmp isr_common
.endm

.section .text
isr_common:
    pushad
    cld
    push esp
    call isr_dispatch
    add esp, 4
    popad
    add esp, 8
    iretd

.irp num, 0,1,2,3,4,5,6,7,9,15,16,18,19,20,22,23,24,25,26,27,28,31
    isr_without_error \num
.endr
.irp num, 8,10,11,12,13,14,17,21,29,30
    isr_with_error \num
.endr
.irp num, 32,33,34,35,36,37,38,39,40,41,42,43,44,45,46,47,48
    isr_without_error \num
.endr
.global isr_stub_128
isr_without_error 128

.section .rodata
.global isr_stub_table
.align 4
isr_stub_table:
.irp num, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31,32,33,34,35,36,37,38,39,40,41,42,43,44,45,46,47,48
    .long isr_stub_\num
.endr
.section .text
"#
);

extern "C" {
    static isr_stub_table: [u32; STUB_TABLE_LEN];
    fn isr_stub_128();
}

/// Entry address of the stub for `vector`, if one exists.
pub fn stub_address(vector: usize) -> Option<u32> {
    if vector == usize::from(SYSCALL_VECTOR) {
        return Some(isr_stub_128 as usize as u32);
    }
    // the table is immutable after link time
    unsafe { isr_stub_table.get(vector).copied() }
}
