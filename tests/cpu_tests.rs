use std::{cell::Cell, rc::Rc};

use tracing_subscriber::fmt;
use v30mz::{
    cpu::{MAX_PREFIXES, VECTOR_BOUND, VECTOR_DIVIDE},
    HookAction, IllegalOpcodePolicy, LoadError, Machine, MachineBuilder, Register,
};

#[cfg(test)]
#[ctor::ctor]
fn init() {
    let fmt_subscriber = fmt::Subscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
        .expect("Unable to set global tracing subscriber");
}

const CODE: u32 = 0x0100;
const HANDLER: u32 = 0x0200;

/// 64 KiB of RAM, PS:IP = 0000:0100, SP = FFFE.
fn machine_with(policy: IllegalOpcodePolicy, code: &[u8]) -> Machine {
    let mut machine = MachineBuilder::new()
        .ram("ram", 0x00000, 0x0FFFF)
        .illegal_opcode_policy(policy)
        .reset_register(Register::Cs, 0)
        .reset_register(Register::Ip, CODE)
        .reset_register(Register::Sp, 0xFFFE)
        .build()
        .unwrap();
    machine.load(CODE, code).unwrap();
    machine
}

fn machine(code: &[u8]) -> Machine {
    machine_with(IllegalOpcodePolicy::Nop, code)
}

/// Runs `code` until it halts.
fn run(code: &[u8]) -> Machine {
    let mut machine = machine(code);
    machine.execute(500);
    assert!(machine.halted());
    machine
}

fn flag(machine: &Machine, mask: u32) -> bool {
    machine.register(Register::Flags) & mask != 0
}

const CF: u32 = 0x0001;
const ZF: u32 = 0x0040;
const SF: u32 = 0x0080;
const OF: u32 = 0x0800;

fn install_vector(machine: &mut Machine, vector: u8, handler: &[u8]) {
    machine
        .load(vector as u32 * 4, &[HANDLER as u8, (HANDLER >> 8) as u8, 0, 0])
        .unwrap();
    machine.load(HANDLER, handler).unwrap();
}

fn stack_word(machine: &Machine, offset: u32) -> u16 {
    let sp = machine.register(Register::Sp);
    let bytes = machine.memory(sp + offset, 2);
    u16::from_le_bytes([bytes[0], bytes[1]])
}

#[test]
fn test_boots_from_reset_vector() {
    // MOV AX,1234 ; HLT at FFFF:0000
    let mut machine = MachineBuilder::new()
        .ram("ram", 0x00000, 0x0FFFF)
        .rom("boot", 0xFFFF0, 0xFFFFF, &[0xB8, 0x34, 0x12, 0xF4])
        .build()
        .unwrap();

    assert_eq!(machine.pc(), 0xFFFF0);
    assert_eq!(machine.execute(100), 100);
    assert_eq!(machine.register(Register::Aw), 0x1234);
    assert!(machine.halted());
    assert_eq!(machine.register(Register::Ip), 4);

    // Halted with nothing pending: the whole budget goes by.
    assert_eq!(machine.execute(1000), 1000);
    assert_eq!(machine.register(Register::Ip), 4);
}

#[test]
fn test_add_flags() {
    // MOV AL,7F ; ADD AL,01 ; HLT
    let mut machine = machine(&[0xB0, 0x7F, 0x04, 0x01, 0xF4]);
    machine.execute(50);

    let flags = machine.register(Register::Flags);
    assert_eq!(machine.register(Register::Aw) & 0xFF, 0x80);
    assert_ne!(flags & 0x0800, 0, "OF");
    assert_ne!(flags & 0x0080, 0, "SF");
    assert_ne!(flags & 0x0010, 0, "AF");
    assert_eq!(flags & 0x0041, 0, "ZF and CF");
    assert_eq!(flags & 0xF002, 0xF002);
}

#[test]
fn test_call_and_return() {
    // CALL 0105 ; HLT ; NOP ; MOV AX,7 ; RET
    let mut machine = machine(&[0xE8, 0x02, 0x00, 0xF4, 0x90, 0xB8, 0x07, 0x00, 0xC3]);
    machine.execute(100);

    assert!(machine.halted());
    assert_eq!(machine.register(Register::Aw), 7);
    assert_eq!(machine.register(Register::Ip), 0x104);
    assert_eq!(machine.register(Register::Sp), 0xFFFE);
}

#[test]
fn test_divide_error_returns_past_instruction() {
    // MOV AX,0010 ; MOV BL,00 ; DIV BL ; NOP
    let mut machine = machine(&[0xB8, 0x10, 0x00, 0xB3, 0x00, 0xF6, 0xF3, 0x90]);
    install_vector(&mut machine, VECTOR_DIVIDE, &[0xF4]);
    machine.execute(200);

    assert!(machine.halted());
    assert_eq!(machine.register(Register::Vector), VECTOR_DIVIDE as u32);
    assert_eq!(machine.register(Register::Pc), HANDLER + 1);
    // Saved IP, then PS, then PSW
    assert_eq!(stack_word(&machine, 0), 0x107);
    assert_eq!(stack_word(&machine, 2), 0x0000);
    assert_eq!(stack_word(&machine, 4) & 0xF002, 0xF002);
    // The dividend is untouched
    assert_eq!(machine.register(Register::Aw), 0x0010);
}

#[test]
fn test_rep_movsb_completes_in_one_instruction() {
    // MOV SI,0300 ; MOV DI,0400 ; MOV CX,5 ; REP MOVSB ; HLT
    let mut machine = machine(&[
        0xBE, 0x00, 0x03, 0xBF, 0x00, 0x04, 0xB9, 0x05, 0x00, 0xF3, 0xA4, 0xF4,
    ]);
    machine.load(0x300, b"HELLO").unwrap();

    for _ in 0..4 {
        machine.step();
    }
    assert_eq!(machine.memory(0x400, 5), b"HELLO".to_vec());
    assert_eq!(machine.register(Register::Cw), 0);
    assert_eq!(machine.register(Register::Ix), 0x305);
    assert_eq!(machine.register(Register::Iy), 0x405);
}

#[test]
fn test_repne_scasb_stops_on_match() {
    // MOV AL,'L' ; MOV DI,0300 ; MOV CX,5 ; REPNE SCASB ; HLT
    let mut machine = machine(&[0xB0, b'L', 0xBF, 0x00, 0x03, 0xB9, 0x05, 0x00, 0xF2, 0xAE, 0xF4]);
    machine.load(0x300, b"HELLO").unwrap();
    machine.execute(200);

    assert_eq!(machine.register(Register::Cw), 2);
    assert_eq!(machine.register(Register::Iy), 0x303);
    assert_ne!(machine.register(Register::Flags) & 0x0040, 0);
}

#[test]
fn test_word_access_wraps_inside_segment() {
    // MOV AX,1234 ; MOV [FFFF],AX ; HLT
    let mut machine = machine(&[0xB8, 0x34, 0x12, 0xA3, 0xFF, 0xFF, 0xF4]);
    machine.execute(50);

    assert_eq!(machine.memory(0xFFFF, 1), vec![0x34]);
    assert_eq!(machine.memory(0x0000, 1), vec![0x12]);
}

#[test]
fn test_illegal_opcode_is_a_nop_by_default() {
    // 0F (illegal) ; MOV AL,1 ; HLT
    let mut machine = machine(&[0x0F, 0xB0, 0x01, 0xF4]);
    assert_eq!(machine.step(), 10);
    assert_eq!(machine.register(Register::Ip), 0x101);

    machine.execute(50);
    assert!(machine.halted());
    assert_eq!(machine.register(Register::Aw) & 0xFF, 1);
}

#[test]
fn test_illegal_opcode_can_trap() {
    let mut machine = machine_with(IllegalOpcodePolicy::Trap(6), &[0x63, 0x90]);
    install_vector(&mut machine, 6, &[0xF4]);
    machine.execute(100);

    assert!(machine.halted());
    assert_eq!(machine.register(Register::Vector), 6);
    assert_eq!(stack_word(&machine, 0), 0x101);
}

#[test]
fn test_hook_breaks_before_instruction() {
    // NOP ; NOP ; NOP ; HLT
    let mut machine = machine(&[0x90, 0x90, 0x90, 0xF4]);
    let seen = Rc::new(Cell::new(0));
    let counter = seen.clone();
    machine.set_instruction_hook(move |pc| {
        counter.set(counter.get() + 1);
        if pc == CODE + 2 {
            HookAction::Break
        } else {
            HookAction::Continue
        }
    });

    let consumed = machine.execute(1000);
    assert!(consumed < 1000);
    assert_eq!(machine.pc(), CODE + 2);
    assert!(!machine.halted());
    assert_eq!(seen.get(), 3);

    // Stepping does not consult the hook, so the breakpoint can be left.
    machine.step();
    assert_eq!(machine.pc(), CODE + 3);
    machine.clear_instruction_hook();
    machine.execute(100);
    assert!(machine.halted());
}

#[test]
fn test_load_out_of_range_writes_nothing() {
    let mut machine = machine(&[0xF4]);
    let result = machine.load(0xFFF0, &[0xAA; 0x20]);
    assert!(matches!(result, Err(LoadError::OutOfRange { .. })));
    assert_eq!(machine.memory(0xFFF0, 16), vec![0xFF; 16]);
}

#[test]
fn test_disassembly_listing() {
    let machine = machine(&[0xB8, 0x34, 0x12, 0xF3, 0xA4, 0xF4]);
    let listing = machine.program(CODE, 3);

    assert_eq!(listing[0].data, "B8 34 12");
    assert_eq!(listing[1].address, CODE + 3);
    assert_eq!(listing[2].instruction, "HLT");
    tracing::info!("\n{}", listing.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"));
}

#[test]
fn test_multi_count_shifts_and_rotates() {
    // MOV AL,02 ; MOV CL,2 ; ROR AL,CL
    let machine = run(&[0xB0, 0x02, 0xB1, 0x02, 0xD2, 0xC8, 0xF4]);
    assert_eq!(machine.register(Register::Aw) & 0xFF, 0x80);
    assert!(flag(&machine, CF));
    assert!(flag(&machine, OF));

    // MOV AL,01 ; RCR AL,2
    let machine = run(&[0xB0, 0x01, 0xC0, 0xD8, 0x02, 0xF4]);
    assert_eq!(machine.register(Register::Aw) & 0xFF, 0x80);
    assert!(!flag(&machine, CF));
    assert!(flag(&machine, OF));

    // MOV AL,85 ; SAR AL,2
    let machine = run(&[0xB0, 0x85, 0xC0, 0xF8, 0x02, 0xF4]);
    assert_eq!(machine.register(Register::Aw) & 0xFF, 0xE1);
    assert!(!flag(&machine, CF));
    assert!(!flag(&machine, OF));
    assert!(flag(&machine, SF));

    // MOV AX,1234 ; MOV CL,4 ; SHL AX,CL
    let machine = run(&[0xB8, 0x34, 0x12, 0xB1, 0x04, 0xD3, 0xE0, 0xF4]);
    assert_eq!(machine.register(Register::Aw), 0x2340);
    assert!(flag(&machine, CF));
}

#[test]
fn test_multiply_results_and_flags() {
    // MOV AL,80 ; MOV BL,2 ; MUL BL
    let machine = run(&[0xB0, 0x80, 0xB3, 0x02, 0xF6, 0xE3, 0xF4]);
    assert_eq!(machine.register(Register::Aw), 0x0100);
    assert!(flag(&machine, CF) && flag(&machine, OF));

    // MOV AL,FE ; MOV BL,3 ; IMUL BL
    let machine = run(&[0xB0, 0xFE, 0xB3, 0x03, 0xF6, 0xEB, 0xF4]);
    assert_eq!(machine.register(Register::Aw), 0xFFFA);
    assert!(!flag(&machine, CF) && !flag(&machine, OF));

    // MOV AX,1000 ; MOV BX,0010 ; MUL BX
    let machine = run(&[0xB8, 0x00, 0x10, 0xBB, 0x10, 0x00, 0xF7, 0xE3, 0xF4]);
    assert_eq!(machine.register(Register::Aw), 0x0000);
    assert_eq!(machine.register(Register::Dw), 0x0001);
    assert!(flag(&machine, CF) && flag(&machine, OF));

    // MOV BX,0010 ; IMUL AX,BX,-3
    let machine = run(&[0xBB, 0x10, 0x00, 0x6B, 0xC3, 0xFD, 0xF4]);
    assert_eq!(machine.register(Register::Aw), 0xFFD0);
    assert!(!flag(&machine, CF));
}

#[test]
fn test_signed_divide_boundaries() {
    let divide = |code: &[u8]| {
        let mut machine = machine(code);
        install_vector(&mut machine, VECTOR_DIVIDE, &[0xF4]);
        machine.execute(200);
        machine
    };

    // MOV AX,FF80 ; MOV BL,1 ; IDIV BL ; HLT
    let low = divide(&[0xB8, 0x80, 0xFF, 0xB3, 0x01, 0xF6, 0xFB, 0xF4]);
    assert_eq!(low.register(Register::Ip), 0x108);
    assert_eq!(low.register(Register::Aw), 0x0080);

    // +128 does not fit in AL
    let high = divide(&[0xB8, 0x80, 0x00, 0xB3, 0x01, 0xF6, 0xFB, 0xF4]);
    assert_eq!(high.register(Register::Pc), HANDLER + 1);
    assert_eq!(stack_word(&high, 0), 0x107);

    // MOV AX,7 ; MOV BL,FE ; IDIV BL: quotient truncates toward zero
    let negative = divide(&[0xB8, 0x07, 0x00, 0xB3, 0xFE, 0xF6, 0xFB, 0xF4]);
    assert_eq!(negative.register(Register::Aw), 0x01FD);

    // MOV AX,8000 ; MOV DX,FFFF ; MOV BX,1 ; IDIV BX
    let low = divide(&[
        0xB8, 0x00, 0x80, 0xBA, 0xFF, 0xFF, 0xBB, 0x01, 0x00, 0xF7, 0xFB, 0xF4,
    ]);
    assert_eq!(low.register(Register::Ip), 0x10C);
    assert_eq!(low.register(Register::Aw), 0x8000);
    assert_eq!(low.register(Register::Dw), 0x0000);

    // Same with DX = 0: +32768 overflows
    let high = divide(&[
        0xB8, 0x00, 0x80, 0xBA, 0x00, 0x00, 0xBB, 0x01, 0x00, 0xF7, 0xFB, 0xF4,
    ]);
    assert_eq!(high.register(Register::Pc), HANDLER + 1);
}

#[test]
fn test_decimal_adjust() {
    // MOV AL,23 ; SUB AL,05 ; DAS
    let machine = run(&[0xB0, 0x23, 0x2C, 0x05, 0x2F, 0xF4]);
    assert_eq!(machine.register(Register::Aw) & 0xFF, 0x18);
    assert!(!flag(&machine, CF));

    // MOV AX,0208 ; SUB AL,9 ; AAS
    let machine = run(&[0xB8, 0x08, 0x02, 0x2C, 0x09, 0x3F, 0xF4]);
    assert_eq!(machine.register(Register::Aw), 0x0109);
    assert!(flag(&machine, CF));

    // MOV AL,4F ; AAM
    let machine = run(&[0xB0, 0x4F, 0xD4, 0x0A, 0xF4]);
    assert_eq!(machine.register(Register::Aw), 0x0709);

    // MOV AX,0709 ; AAD
    let machine = run(&[0xB8, 0x09, 0x07, 0xD5, 0x0A, 0xF4]);
    assert_eq!(machine.register(Register::Aw), 0x004F);
    assert!(!flag(&machine, ZF));

    // MOV AL,4F ; AAM 0 raises a divide error
    let mut zero = machine_with(IllegalOpcodePolicy::Nop, &[0xB0, 0x4F, 0xD4, 0x00, 0xF4]);
    install_vector(&mut zero, VECTOR_DIVIDE, &[0xF4]);
    zero.execute(200);
    assert_eq!(zero.register(Register::Pc), HANDLER + 1);
    assert_eq!(stack_word(&zero, 0), 0x104);
    assert_eq!(zero.register(Register::Aw) & 0xFF, 0x4F);
}

#[test]
fn test_repe_cmpsb_stops_on_mismatch() {
    // MOV SI,0300 ; MOV DI,0400 ; MOV CX,5 ; REPE CMPSB ; HLT
    let mut machine = machine(&[
        0xBE, 0x00, 0x03, 0xBF, 0x00, 0x04, 0xB9, 0x05, 0x00, 0xF3, 0xA6, 0xF4,
    ]);
    machine.load(0x300, b"HELLO").unwrap();
    machine.load(0x400, b"HELP!").unwrap();
    machine.execute(300);

    assert_eq!(machine.register(Register::Cw), 1);
    assert_eq!(machine.register(Register::Ix), 0x304);
    assert_eq!(machine.register(Register::Iy), 0x404);
    assert!(!flag(&machine, ZF));
    assert!(flag(&machine, CF));
}

#[test]
fn test_bound_traps_outside_range() {
    // MOV AX,5 ; BOUND AX,[0300] ; HLT
    let mut machine = machine(&[0xB8, 0x05, 0x00, 0x62, 0x06, 0x00, 0x03, 0xF4]);
    machine.load(0x300, &[0x00, 0x00, 0x04, 0x00]).unwrap();
    install_vector(&mut machine, VECTOR_BOUND, &[0xF4]);
    machine.execute(200);

    assert_eq!(machine.register(Register::Vector), VECTOR_BOUND as u32);
    assert_eq!(machine.register(Register::Pc), HANDLER + 1);
    assert_eq!(stack_word(&machine, 0), 0x107);

    // MOV AX,3 is inside 0..=4
    let mut inside = machine_with(
        IllegalOpcodePolicy::Nop,
        &[0xB8, 0x03, 0x00, 0x62, 0x06, 0x00, 0x03, 0xF4],
    );
    inside.load(0x300, &[0x00, 0x00, 0x04, 0x00]).unwrap();
    install_vector(&mut inside, VECTOR_BOUND, &[0xF4]);
    inside.execute(200);
    assert_eq!(inside.register(Register::Ip), 0x108);
}

#[test]
fn test_enter_and_leave() {
    // MOV BP,1234 ; ENTER 4,1 ; LEAVE ; HLT
    let mut machine = machine(&[0xBD, 0x34, 0x12, 0xC8, 0x04, 0x00, 0x01, 0xC9, 0xF4]);
    machine.step_for(2);

    assert_eq!(machine.register(Register::Bp), 0xFFFC);
    assert_eq!(machine.register(Register::Sp), 0xFFF6);
    assert_eq!(machine.memory(0xFFFC, 2), vec![0x34, 0x12]);
    assert_eq!(machine.memory(0xFFFA, 2), vec![0xFC, 0xFF]);

    machine.step();
    assert_eq!(machine.register(Register::Bp), 0x1234);
    assert_eq!(machine.register(Register::Sp), 0xFFFE);
}

#[test]
fn test_pusha_and_popa() {
    let code = [
        0xB8, 0x01, 0x00, // MOV AX,1
        0xB9, 0x02, 0x00, // MOV CX,2
        0xBA, 0x03, 0x00, // MOV DX,3
        0xBB, 0x04, 0x00, // MOV BX,4
        0xBD, 0x05, 0x00, // MOV BP,5
        0xBE, 0x06, 0x00, // MOV SI,6
        0xBF, 0x07, 0x00, // MOV DI,7
        0x60, // PUSHA
        0x31, 0xC0, // XOR AX,AX
        0x31, 0xF6, // XOR SI,SI
        0x61, // POPA
        0xF4, // HLT
    ];
    let mut machine = machine(&code);
    machine.step_for(8);

    assert_eq!(machine.register(Register::Sp), 0xFFEE);
    let stacked: Vec<u16> = (0..8).map(|i| stack_word(&machine, i * 2)).collect();
    assert_eq!(stacked, vec![7, 6, 5, 0xFFFE, 4, 3, 2, 1]);

    machine.execute(100);
    assert_eq!(machine.register(Register::Aw), 1);
    assert_eq!(machine.register(Register::Ix), 6);
    assert_eq!(machine.register(Register::Sp), 0xFFFE);
}

#[test]
fn test_loop_and_jcxz() {
    let code = [
        0xB9, 0x05, 0x00, // MOV CX,5
        0x31, 0xDB, // XOR BX,BX
        0x43, // INC BX
        0xE2, 0xFD, // LOOP -3
        0xE3, 0x01, // JCXZ +1
        0xF4, // HLT (skipped)
        0xBA, 0x34, 0x12, // MOV DX,1234
        0xF4, // HLT
    ];
    let machine = run(&code);

    assert_eq!(machine.register(Register::Bw), 5);
    assert_eq!(machine.register(Register::Cw), 0);
    assert_eq!(machine.register(Register::Dw), 0x1234);
    assert_eq!(machine.register(Register::Ip), 0x10F);
}

#[test]
fn test_segment_override_on_modrm_and_string_source() {
    let code = [
        0xB8, 0x00, 0x01, // MOV AX,0100
        0x8E, 0xC0, // MOV ES,AX
        0xBB, 0x20, 0x00, // MOV BX,0020
        0x26, 0x8A, 0x0F, // MOV CL,ES:[BX]
        0x8A, 0x17, // MOV DL,[BX]
        0xBE, 0x20, 0x00, // MOV SI,0020
        0xBF, 0x40, 0x00, // MOV DI,0040
        0x26, 0xA4, // ES: MOVSB
        0xF4, // HLT
    ];
    let mut machine = machine(&code);
    machine.load(0x0020, &[0x11]).unwrap();
    machine.load(0x1020, &[0x5A]).unwrap();
    machine.execute(200);

    assert_eq!(machine.register(Register::Cw) & 0xFF, 0x5A);
    assert_eq!(machine.register(Register::Dw) & 0xFF, 0x11);
    assert_eq!(machine.memory(0x1040, 1), vec![0x5A]);
    assert_eq!(machine.memory(0x0040, 1), vec![0xFF]);
}

#[test]
fn test_prefix_run_cannot_stall_execute() {
    let mut machine = machine(&[]);
    machine.load(0x0000, &vec![0x26; 0x10000]).unwrap();

    let consumed = machine.execute(100);
    assert!(consumed >= 100);
    assert!(consumed < 100 + MAX_PREFIXES);

    // Each capped run costs one cycle per prefix byte.
    let advanced = machine.register(Register::Ip) - CODE;
    assert_eq!(advanced, consumed);
    assert_eq!(advanced % MAX_PREFIXES, 0);
}
