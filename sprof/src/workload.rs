//! Toy interpreter used as the profiling target of the `sprof` binary
//!
//! Runs a fixed bytecode program over and over, maintaining a
//! [`ShadowStack`] the way a real interpreter would and reporting its
//! allocations to the memory sampler. Collections mark themselves with a
//! reclaim guard so CPU ticks landing in them are accounted to GC.

use std::collections::HashMap;
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::FrameId;
use crate::host::ShadowStack;
use crate::profiler::Profiler;

/// Interpreted functions, one frame id each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Main,
    Parse,
    Eval,
    Fib,
    Concat,
    Collect,
}

impl Function {
    pub const ALL: [Function; 6] = [
        Function::Main,
        Function::Parse,
        Function::Eval,
        Function::Fib,
        Function::Concat,
        Function::Collect,
    ];

    #[must_use]
    pub fn frame(self) -> FrameId {
        // 0 is reserved for padding
        FrameId(self as u64 + 1)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Function::Main => "main",
            Function::Parse => "parse",
            Function::Eval => "eval",
            Function::Fib => "fib",
            Function::Concat => "concat",
            Function::Collect => "collect",
        }
    }
}

/// Frame id to function name table for the exporter
#[must_use]
pub fn frame_names() -> HashMap<FrameId, String> {
    Function::ALL.iter().map(|f| (f.frame(), f.name().to_string())).collect()
}

/// Instructions of the toy program
#[derive(Debug, Clone, Copy)]
enum Op {
    Parse(usize),
    Fib(u32),
    Concat(usize),
    Collect,
}

const PROGRAM: [Op; 6] = [
    Op::Parse(2_000),
    Op::Fib(22),
    Op::Concat(4_096),
    Op::Fib(18),
    Op::Concat(512),
    Op::Collect,
];

/// Interpreter state: the shadow stack it maintains and the live heap
pub struct Interpreter<'a> {
    stack: &'a ShadowStack,
    profiler: &'a Profiler,
    heap: Vec<Vec<u8>>,
}

impl<'a> Interpreter<'a> {
    #[must_use]
    pub fn new(stack: &'a ShadowStack, profiler: &'a Profiler) -> Self {
        Self { stack, profiler, heap: Vec::new() }
    }

    /// Run the program until `stop` is set; returns the number of runs.
    pub fn run_until(&mut self, stop: &AtomicBool) -> u64 {
        let mut runs = 0;
        while !stop.load(Ordering::Relaxed) {
            self.run_once();
            runs += 1;
        }
        runs
    }

    /// Run the program once.
    pub fn run_once(&mut self) {
        let _main = self.stack.push(Function::Main.frame());
        for op in PROGRAM {
            let _eval = self.stack.push(Function::Eval.frame());
            match op {
                Op::Parse(tokens) => self.parse(tokens),
                Op::Fib(n) => {
                    black_box(self.fib(n));
                }
                Op::Concat(bytes) => self.concat(bytes),
                Op::Collect => self.collect(),
            }
        }
    }

    /// Bytes currently held by the interpreter heap
    #[must_use]
    pub fn heap_bytes(&self) -> usize {
        self.heap.iter().map(Vec::len).sum()
    }

    fn parse(&mut self, tokens: usize) {
        let _frame = self.stack.push(Function::Parse.frame());
        let mut checksum = 0u64;
        for i in 0..tokens {
            checksum = checksum.wrapping_mul(31).wrapping_add(black_box(i as u64));
        }
        black_box(checksum);
    }

    fn fib(&self, n: u32) -> u64 {
        let _frame = self.stack.push(Function::Fib.frame());
        if n < 2 {
            return u64::from(n);
        }
        self.fib(n - 1).wrapping_add(self.fib(n - 2))
    }

    fn concat(&mut self, bytes: usize) {
        let _frame = self.stack.push(Function::Concat.frame());
        self.allocate(bytes);
    }

    fn collect(&mut self) {
        let _frame = self.stack.push(Function::Collect.frame());
        let _gc = self.stack.enter_reclaim();
        // Keep the newest allocation alive
        let survivor = self.heap.pop();
        self.heap.clear();
        self.heap.extend(survivor);
    }

    fn allocate(&mut self, bytes: usize) {
        self.profiler.memory().note_allocation(bytes as u64);
        self.heap.push(vec![0u8; bytes]);
    }
}
