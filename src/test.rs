//! The `#[test_case]` harness run under `cargo test`: a lightweight,
//! in-kernel test runner distinct from `test_harness`'s fault-injection
//! suites (those drive the IDT through real faults; these check pure logic
//! with no live dispatcher involved).

use core::panic::PanicInfo;

use crate::arch::x86::qemu::{exit_qemu, QemuExitCode};
use crate::{print, println};

pub trait Testable {
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        print!("{}...\t", core::any::type_name::<T>());
        self();
        println!("[ok]");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) {
    println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("[failed]");
    println!("Error: {}", info);
    exit_qemu(QemuExitCode::Failed);
}

#[test_case]
fn trivial_assertion() {
    assert_eq!(1, 1);
}
