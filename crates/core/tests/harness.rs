mod common;

use common::{init_tracing, op, ImageBuilder, ENTRY, STACK_TOP};
use thumbhost_config::HarnessManifest;
use thumbhost_core::diagnostics::DisasmLine;
use thumbhost_core::memory::PeripheralAddress;
use thumbhost_core::{
    EngineAccess, Fault, FirmwareImage, HarnessError, InitError, Machine, MemAccess, Phase, Reg,
    SimulationState, ThumbDisassembler, ThumbEngine,
};

type ThumbMachine<'s> = Machine<'s, ThumbEngine, ThumbDisassembler>;

fn ready<'s>(state: &'s mut SimulationState, image: &'s mut FirmwareImage) -> ThumbMachine<'s> {
    init_tracing();
    let mut machine = Machine::thumb(state, Some(image));
    machine.init().unwrap();
    assert_eq!(machine.phase(), Phase::Ready);
    machine
}

fn read_bytes(machine: &ThumbMachine<'_>, address: u32, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    machine.engine().mem_read(address, &mut buf).unwrap();
    buf
}

#[test]
fn test_init_points_at_reset_vector() {
    let mut image = ImageBuilder::new().op(op::B_SELF).firmware();
    let mut state = SimulationState::new();
    let machine = ready(&mut state, &mut image);

    assert_eq!(machine.engine().reg_read(Reg::Pc), ENTRY);
    assert_eq!(machine.engine().reg_read(Reg::Sp), STACK_TOP);
    let dump = machine.register_dump().to_string();
    assert!(dump.contains("pc   \t0x08000008\n"));
}

#[test]
fn test_ping_syscall() {
    let mut image = ImageBuilder::new()
        .ops(&[op::movs(0, 1), op::svc(0), op::B_SELF])
        .firmware();
    let mut state = SimulationState::new();
    let mut machine = ready(&mut state, &mut image);

    assert!(machine.step(None).unwrap());
    let regs = [Reg::R0, Reg::R1, Reg::R2, Reg::R3].map(|r| machine.engine().reg_read(r));
    assert_eq!(regs, [16, 32, 48, 64]);
    assert_eq!(machine.engine().reg_read(Reg::Pc), ENTRY + 4);
    assert_eq!(machine.phase(), Phase::Ready);
}

#[test]
fn test_api_call_writes_json_response() {
    // Request text is the first four bytes of the image.
    let mut image = ImageBuilder::new()
        .ldr_const(0, 0x0800_0000)
        .ops(&[op::movs(1, 4), op::svc(1), op::B_SELF])
        .firmware();
    let mut state = SimulationState::new();
    let mut machine = ready(&mut state, &mut image);

    assert!(machine.step(None).unwrap());
    assert_eq!(machine.engine().reg_read(Reg::R0), 0xE000_0000);
    assert_eq!(machine.engine().reg_read(Reg::R1), 9);
    assert_eq!(read_bytes(&machine, 0xE000_0000, 10), b"[\"hello\"]\0");
}

#[test]
fn test_api_call_request_out_of_map() {
    let mut image = ImageBuilder::new()
        .ldr_const(0, 0x1000_0000)
        .ops(&[op::movs(1, 4), op::svc(1), op::B_SELF])
        .firmware();
    let mut state = SimulationState::new();
    let mut machine = ready(&mut state, &mut image);

    let err = machine.step(None).unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Fault(Fault::UnmappedAccess {
            access: MemAccess::Read,
            address: 0x1000_0000,
            size: 4
        })
    ));
}

#[test]
fn test_unknown_syscall_faults_machine() {
    let mut image = ImageBuilder::new()
        .ops(&[op::svc(99), op::B_SELF])
        .firmware();
    let mut state = SimulationState::new();
    let mut machine = ready(&mut state, &mut image);

    let err = machine.step(None).unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Fault(Fault::UnknownSyscall {
            selector: 99,
            pc: ENTRY
        })
    ));
    assert_eq!(machine.phase(), Phase::Faulted);
    assert!(matches!(machine.step(None), Err(HarnessError::Faulted)));
    assert!(matches!(machine.reset(), Err(HarnessError::Faulted)));
}

#[test]
fn test_serial_input_fifo() {
    let mut image = ImageBuilder::new()
        .ldr_const(1, PeripheralAddress::IO_RXR)
        .ops(&[op::ldr(0, 1, 0), op::ldr(2, 1, 0), op::ldr(3, 1, 0), op::B_SELF])
        .firmware();
    let mut state = SimulationState::new().with_input(b"ok");
    let mut machine = ready(&mut state, &mut image);

    assert!(!machine.step(Some(5)).unwrap());
    let engine = machine.engine();
    assert_eq!(engine.reg_read(Reg::R0), b'o' as u32);
    assert_eq!(engine.reg_read(Reg::R2), b'k' as u32);
    assert_eq!(engine.reg_read(Reg::R3), 0);
    assert!(machine.state().input.is_empty());
}

#[test]
fn test_serial_output() {
    let mut image = ImageBuilder::new()
        .ldr_const(1, PeripheralAddress::IO_TXR)
        .ops(&[
            op::movs(0, b'H'),
            op::str(0, 1, 0),
            op::movs(0, b'i'),
            op::str(0, 1, 0),
            op::svc(0),
            op::B_SELF,
        ])
        .firmware();
    let mut state = SimulationState::new();
    {
        let mut machine = ready(&mut state, &mut image);
        assert!(machine.step(None).unwrap());
    }
    assert_eq!(state.output_text(), "Hi");
}

#[test]
fn test_ram_size_register() {
    let mut image = ImageBuilder::new()
        .ldr_const(1, PeripheralAddress::CON_RAM_SIZE)
        .ops(&[op::ldr(0, 1, 0), op::B_SELF])
        .firmware();
    let mut state = SimulationState::new();
    state.ram_size = 0x8000;
    let mut machine = ready(&mut state, &mut image);

    machine.step(Some(2)).unwrap();
    assert_eq!(machine.engine().reg_read(Reg::R0), 0x8000);
}

#[test]
fn test_unmapped_load_faults() {
    let mut image = ImageBuilder::new()
        .ops(&[op::movs(1, 0), op::ldr(0, 1, 0), op::B_SELF])
        .firmware();
    let mut state = SimulationState::new();
    let mut machine = ready(&mut state, &mut image);

    let err = machine.step(None).unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Fault(Fault::UnmappedAccess {
            access: MemAccess::Read,
            address: 0,
            size: 4
        })
    ));
    // PC stays on the faulting load.
    assert_eq!(machine.engine().reg_read(Reg::Pc), ENTRY + 2);

    let dump = machine.fault_dump().to_string();
    let marked: Vec<&str> = dump.lines().filter(|l| l.starts_with("> ")).collect();
    assert_eq!(marked, vec!["> 0x800000a 0x6808 ldr r0, [r1]"]);
}

#[test]
fn test_unmapped_store_leaves_console_state() {
    let mut image = ImageBuilder::new()
        .ldr_const(1, PeripheralAddress::IO_TXR)
        .ops(&[
            op::movs(0, b'A'),
            op::str(0, 1, 0),
            op::movs(2, 0),
            op::str(0, 2, 0),
            op::B_SELF,
        ])
        .firmware();
    let mut state = SimulationState::new().with_input(b"z");
    {
        let mut machine = ready(&mut state, &mut image);
        let err = machine.step(None).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Fault(Fault::UnmappedAccess {
                access: MemAccess::Write,
                address: 0,
                size: 4
            })
        ));
        assert_eq!(machine.phase(), Phase::Faulted);
    }
    assert_eq!(state.output, b"A");
    assert_eq!(state.input.iter().copied().collect::<Vec<_>>(), b"z");
}

#[test]
fn test_budget_override_is_restored() {
    let mut image = ImageBuilder::new().op(op::B_SELF).firmware();
    let mut state = SimulationState::new();
    state.cycle = 1000;
    let mut machine = ready(&mut state, &mut image);

    assert!(!machine.step(Some(10)).unwrap());
    assert_eq!(machine.state().cycle, 1000);
}

#[test]
fn test_budget_override_restored_after_fault() {
    let mut image = ImageBuilder::new()
        .ops(&[op::movs(1, 0), op::ldr(0, 1, 0)])
        .firmware();
    let mut state = SimulationState::new();
    state.cycle = 1000;
    let mut machine = ready(&mut state, &mut image);

    assert!(machine.step(Some(10)).is_err());
    assert_eq!(machine.state().cycle, 1000);
}

#[test]
fn test_standing_budget_is_consumed() {
    let mut image = ImageBuilder::new()
        .ops(&[op::svc(0), op::B_SELF])
        .firmware();
    let mut state = SimulationState::new();
    state.cycle = 100;
    let mut machine = ready(&mut state, &mut image);

    assert!(machine.step(None).unwrap());
    assert_eq!(machine.state().cycle, 99);
    assert!(!machine.step(None).unwrap());
    assert_eq!(machine.state().cycle, 0);

    // An exhausted budget returns without executing.
    let pc = machine.engine().reg_read(Reg::Pc);
    assert!(!machine.step(None).unwrap());
    assert_eq!(machine.engine().reg_read(Reg::Pc), pc);
}

#[test]
fn test_run_stops_when_budget_is_spent() {
    let mut image = ImageBuilder::new()
        .ops(&[op::svc(0), op::svc(0), op::B_SELF])
        .firmware();
    let mut state = SimulationState::new();
    state.cycle = 50;
    {
        let mut machine = ready(&mut state, &mut image);
        machine.run().unwrap();
        assert_eq!(machine.phase(), Phase::Ready);
    }
    assert_eq!(state.cycle, 0);
}

#[test]
fn test_run_reraises_fault() {
    let mut image = ImageBuilder::new().ops(&[op::svc(42)]).firmware();
    let mut state = SimulationState::new();
    let mut machine = ready(&mut state, &mut image);

    assert!(matches!(
        machine.run(),
        Err(HarnessError::Fault(Fault::UnknownSyscall { selector: 42, .. }))
    ));
}

#[test]
fn test_reset_is_deterministic() {
    let mut image = ImageBuilder::new()
        .ldr_const(1, 0x2000_0100)
        .ops(&[op::movs(0, 0x55), op::str(0, 1, 0), op::B_SELF])
        .firmware();
    let mut state = SimulationState::new();
    let mut machine = ready(&mut state, &mut image);

    machine.step(Some(3)).unwrap();
    assert_eq!(read_bytes(&machine, 0x2000_0100, 1), vec![0x55]);

    machine.reset().unwrap();
    let first = machine.register_dump();
    assert_eq!(read_bytes(&machine, 0x2000_0100, 1), vec![0]);
    assert_eq!(machine.engine().reg_read(Reg::R0), 0);
    assert_eq!(machine.engine().reg_read(Reg::Pc), ENTRY);

    machine.reset().unwrap();
    assert_eq!(machine.register_dump(), first);
}

#[test]
fn test_reset_replays_identical_output() {
    let mut image = ImageBuilder::new()
        .ldr_const(1, PeripheralAddress::IO_TXR)
        .ops(&[
            op::movs(0, b'H'),
            op::str(0, 1, 0),
            op::svc(0),
            op::movs(0, b'!'),
            op::str(0, 1, 0),
            op::B_SELF,
        ])
        .firmware();
    let mut state = SimulationState::new();
    state.write_to_stdout = true;
    state.cycle = 20;
    let mut machine = ready(&mut state, &mut image);

    machine.run().unwrap();
    let first = std::mem::take(&mut machine.state_mut().output);
    assert_eq!(first, b"H!");

    machine.reset().unwrap();
    machine.state_mut().cycle = 20;
    machine.run().unwrap();
    assert_eq!(machine.state().output, first);
}

#[test]
fn test_machine_from_manifest() {
    let dir = std::env::temp_dir().join(format!("thumbhost-manifest-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let firmware = ImageBuilder::new()
        .ldr_const(1, PeripheralAddress::IO_RXR)
        .ldr_const(2, PeripheralAddress::IO_TXR)
        .ops(&[op::ldr(0, 1, 0), op::str(0, 2, 0), op::svc(0), op::B_SELF])
        .build();
    std::fs::write(dir.join("fw.bin"), firmware).unwrap();
    std::fs::write(
        dir.join("harness.yaml"),
        r#"
schema_version: "1.0"
firmware: "fw.bin"
ram_size: "32 KiB"
cycle_budget: 30
input: "q"
verbose: 2
"#,
    )
    .unwrap();

    let manifest = HarnessManifest::from_file(dir.join("harness.yaml")).unwrap();
    let mut state = SimulationState::from_manifest(&manifest).unwrap();
    let mut image = FirmwareImage::from_manifest(&manifest, &dir);
    {
        init_tracing();
        let mut machine = Machine::thumb(&mut state, Some(&mut image)).with_manifest(&manifest);
        assert_eq!(machine.verbosity(), 2);
        machine.init().unwrap();
        machine.run().unwrap();
    }
    assert_eq!(state.output_text(), "q");
    assert_eq!(state.ram_size, 32 * 1024);
    assert_eq!(state.cycle, 0);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_invalid_state_rejected() {
    let mut image = ImageBuilder::new().op(op::B_SELF).firmware();
    let mut state = SimulationState::new();
    state.ram_size = 3;
    let mut machine = Machine::thumb(&mut state, Some(&mut image));

    let err = machine.init().unwrap_err();
    assert!(matches!(err, HarnessError::Init(InitError::InvalidState(_))));
    assert!(err.to_string().contains("Invalid state"));
}

#[test]
fn test_missing_firmware() {
    let mut state = SimulationState::new();
    let mut machine = Machine::thumb(&mut state, None);
    assert!(matches!(
        machine.init(),
        Err(HarnessError::Init(InitError::FirmwareMissing))
    ));
}

#[test]
fn test_oversized_firmware() {
    let mut bytes = ImageBuilder::new().op(op::B_SELF).build();
    bytes.resize(256 * 1024 + 4, 0);
    let mut image = FirmwareImage::from_bytes(bytes);
    let mut state = SimulationState::new();
    let mut machine = Machine::thumb(&mut state, Some(&mut image));
    assert!(matches!(
        machine.init(),
        Err(HarnessError::Init(InitError::FirmwareTooLarge { .. }))
    ));
}

#[test]
fn test_step_before_init() {
    let mut image = ImageBuilder::new().op(op::B_SELF).firmware();
    let mut state = SimulationState::new();
    let mut machine = Machine::thumb(&mut state, Some(&mut image));

    assert!(matches!(machine.step(None), Err(HarnessError::NotReady)));
    assert!(matches!(machine.run(), Err(HarnessError::NotReady)));
    assert!(matches!(machine.reset(), Err(HarnessError::NotReady)));
}

#[test]
fn test_memory_report() {
    let mut image = ImageBuilder::new().op(op::B_SELF).firmware();
    let mut state = SimulationState::new();
    let machine = ready(&mut state, &mut image);

    let report = machine.memory_report();
    assert_eq!(report.regions.len(), 5);
    assert_eq!(report.total(), 640 * 1024);
    assert!(report.to_string().ends_with("memory total: 640 kb"));
    machine.report_memory();
}

#[test]
fn test_disassembly_with_symbols() {
    let mut image = ImageBuilder::new()
        .ops(&[op::movs(0, 42), op::B_SELF])
        .firmware()
        .with_symbol(ENTRY | 1, 4, "main");
    let mut state = SimulationState::new();
    let machine = ready(&mut state, &mut image);

    let lines = machine.disassemble(ENTRY, 2);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].to_string(), "main 0x8000008 0x202a movs r0, #0x2a");

    assert_eq!(
        machine.disassemble(0x1000_0000, 1),
        vec![DisasmLine::ReadFailure {
            address: 0x1000_0000
        }]
    );
}

#[test]
fn test_trace_reports_function_transitions() {
    // +0  bl worker
    // +4  bl __aeabi_uidiv
    // +8  svc #0
    // +10 b .
    // +12 worker: movs r0, #1; bx lr
    // +16 __aeabi_uidiv: bx lr
    let worker = ENTRY + 12;
    let helper = ENTRY + 16;
    let mut builder = ImageBuilder::new();
    builder.bl(worker).bl(helper).ops(&[
        op::svc(0),
        op::B_SELF,
        op::movs(0, 1),
        op::BX_LR,
        op::BX_LR,
    ]);
    let mut image = builder
        .firmware()
        .with_symbol(ENTRY, 12, "main")
        .with_symbol(worker, 4, "worker")
        .with_symbol(helper, 2, "__aeabi_uidiv");

    let mut state = SimulationState::new();
    state.cycle = 200;
    init_tracing();
    let mut machine = Machine::thumb(&mut state, Some(&mut image)).with_verbosity(2);
    machine.init().unwrap();
    machine.run().unwrap();

    assert_eq!(machine.trace_transitions(), 2);
    assert_eq!(machine.last_function(), Some("main"));
    assert_eq!(machine.engine().reg_read(Reg::R0), 16);
}
