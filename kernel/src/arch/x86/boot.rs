//! Multiboot entry point.
//!
//! GRUB jumps here in protected mode with paging off, `eax` holding the
//! multiboot magic and `ebx` the physical address of the info block. The
//! kernel is linked at 0xC0100000 but loaded at 0x00100000, so until paging is
//! on every symbol has to be rebased by hand. A throwaway directory of 4 MiB
//! pages maps the first 16 MiB both at 0 and at 0xC0000000; `paging::init`
//! replaces it with the real kernel directory.

core::arch::global_asm!(
    r#"
.set MULTIBOOT_MAGIC, 0x1BADB002
.set MULTIBOOT_FLAGS, 0x00000003
.set KERNEL_VIRTUAL_BASE, 0xC0000000
.set KERNEL_PDE_INDEX, 768
.set BOOT_LARGE_PAGES, 4
.set PDE_PRESENT_WRITABLE_HUGE, 0x83
.set CR4_PSE, 0x10
.set CR0_PG, 0x80000000

.section .multiboot, "a"
.align 4
.long MULTIBOOT_MAGIC
.long MULTIBOOT_FLAGS
.long -(MULTIBOOT_MAGIC + MULTIBOOT_FLAGS)

.section .bss
.align 4096
boot_page_directory:
    .skip 4096
.align 16
boot_stack_bottom:
    .skip 16384
boot_stack_top:

.section .text.boot, "ax"
.global _start
.set _start, _kernel_entry - KERNEL_VIRTUAL_BASE
.global _kernel_entry
_kernel_entry:
    mov esi, eax
    mov edi, offset boot_page_directory - KERNEL_VIRTUAL_BASE
    xor ecx, ecx
.Lfill_directory:
    mov eax, ecx
    shl eax, 22
    or eax, PDE_PRESENT_WRITABLE_HUGE
    mov [edi + ecx * 4], eax
    mov [edi + ecx * 4 + KERNEL_PDE_INDEX * 4], eax
    inc ecx
    cmp ecx, BOOT_LARGE_PAGES
    jne .Lfill_directory

    mov cr3, edi
    mov eax, cr4
    or eax, CR4_PSE
    mov cr4, eax
    mov eax, cr0
    or eax, CR0_PG
    mov cr0, eax

    mov eax, offset .Lhigher_half
    jmp eax

.Lhigher_half:
    mov esp, offset boot_stack_top
    xor ebp, ebp
    push ebx
    push esi
    call kmain
.Lhang:
    cli
    hlt
    jmp .Lhang
.section .text
"#
);
