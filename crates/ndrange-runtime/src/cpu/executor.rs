//! Work-group executor for the CPU device
//!
//! Work-groups run in parallel on the rayon pool. Inside a group the
//! work-items run in lock-step phases separated by barriers:
//!
//! ```text
//! phase 0:  item 0 ──► BarSync   item 1 ──► BarSync   ...   item n ──► BarSync
//!                       (every item of the group arrived: release all)
//! phase 1:  item 0 ──► EXIT      item 1 ──► EXIT      ...   item n ──► EXIT
//! ```
//!
//! A phase runs each item until it reaches a barrier or exits. A phase ends
//! with either every item waiting at a barrier (the next phase starts) or
//! every item exited (the group is done). Anything else is barrier
//! divergence.

use super::memory::MemoryManager;
use super::objects::PendingLaunch;
use crate::error::{Result, RuntimeError};
use crate::isa::{Instruction, KernelProgram, ParamKind, Type};
use crate::runtime::{KernelArg, LaunchGeometry, MemHandle};
use ndrange_tracing::perf_span;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::sync::Arc;

/// Argument as seen by executing work-items
#[derive(Debug, Clone, Copy)]
enum Binding {
    Buffer {
        handle: MemHandle,
        readable: bool,
        writable: bool,
    },
    Scalar(i64),
}

/// Where a work-item stopped at the end of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneState {
    Running,
    AtBarrier,
    Exited,
}

/// Private state of one work-item
struct Lane {
    registers: Vec<i64>,
    pc: usize,
    state: LaneState,
    local: [usize; 3],
}

/// What the interpreter does after one instruction
enum Flow {
    Next,
    Barrier,
    Exit,
}

/// CPU executor
pub struct CpuExecutor {
    memory: Arc<RwLock<MemoryManager>>,
}

impl CpuExecutor {
    pub fn new(memory: Arc<RwLock<MemoryManager>>) -> Self {
        Self { memory }
    }

    /// Run a launch to completion
    pub(crate) fn execute(&self, launch: &PendingLaunch) -> Result<()> {
        let geometry = &launch.geometry;
        let kernel = launch.kernel.as_ref();
        let _span = perf_span!(
            "cpu_execute_kernel",
            kernel = kernel.name.as_str(),
            work_items = geometry.total_work_items(),
            work_groups = geometry.total_groups()
        );

        let bindings = self.resolve_bindings(kernel, &launch.args)?;

        (0..geometry.total_groups())
            .into_par_iter()
            .try_for_each(|group_idx| self.run_group(kernel, geometry, &bindings, geometry.group_coords(group_idx)))
    }

    fn resolve_bindings(&self, kernel: &KernelProgram, args: &[KernelArg]) -> Result<Vec<Binding>> {
        let memory = self.memory.read();
        kernel
            .params
            .iter()
            .zip(args)
            .enumerate()
            .map(|(index, (param, arg))| match (param.kind, arg) {
                (ParamKind::Buffer { .. }, KernelArg::Buffer(handle)) => {
                    let flags = memory.buffer_flags(*handle)?;
                    Ok(Binding::Buffer {
                        handle: *handle,
                        readable: flags.kernel_readable(),
                        writable: flags.kernel_writable(),
                    })
                }
                (ParamKind::Scalar { ty }, KernelArg::Scalar(bytes)) if bytes.len() == ty.size_bytes() => {
                    Ok(Binding::Scalar(ty.decode(bytes)))
                }
                _ => Err(invalid_binding(kernel, index, &param.name)),
            })
            .collect()
    }

    fn run_group(
        &self,
        kernel: &KernelProgram,
        geometry: &LaunchGeometry,
        bindings: &[Binding],
        group: [usize; 3],
    ) -> Result<()> {
        let mut lanes: Vec<Lane> = (0..geometry.group_size())
            .map(|idx| Lane {
                registers: vec![0; kernel.register_count as usize],
                pc: 0,
                state: LaneState::Running,
                local: geometry.local_coords(idx),
            })
            .collect();

        loop {
            // One lock acquisition per phase
            {
                let mut memory = self.memory.write();
                for lane in lanes.iter_mut() {
                    self.run_lane(&mut memory, kernel, geometry, bindings, group, lane)
                        .map_err(|e| e.in_work_item(&kernel.name, geometry.global_id(group, lane.local)))?;
                }
            }

            let waiting = lanes.iter().filter(|l| l.state == LaneState::AtBarrier).count();
            if waiting == 0 {
                return Ok(());
            }
            if waiting != lanes.len() {
                return Err(RuntimeError::BarrierDivergence {
                    group,
                    waiting,
                    lanes: lanes.len(),
                });
            }

            for lane in lanes.iter_mut() {
                lane.state = LaneState::Running;
                lane.pc += 1;
            }
        }
    }

    fn run_lane(
        &self,
        memory: &mut MemoryManager,
        kernel: &KernelProgram,
        geometry: &LaunchGeometry,
        bindings: &[Binding],
        group: [usize; 3],
        lane: &mut Lane,
    ) -> Result<()> {
        while lane.state == LaneState::Running {
            let Some(instruction) = kernel.instructions.get(lane.pc) else {
                lane.state = LaneState::Exited;
                break;
            };

            match self.step(memory, kernel, geometry, bindings, group, lane, instruction)? {
                Flow::Next => lane.pc += 1,
                Flow::Barrier => lane.state = LaneState::AtBarrier,
                Flow::Exit => lane.state = LaneState::Exited,
            }
        }
        Ok(())
    }

    // ============================================================================================
    // Instruction Dispatch
    // ============================================================================================

    fn step(
        &self,
        memory: &mut MemoryManager,
        kernel: &KernelProgram,
        geometry: &LaunchGeometry,
        bindings: &[Binding],
        group: [usize; 3],
        lane: &mut Lane,
        instruction: &Instruction,
    ) -> Result<Flow> {
        let regs = &mut lane.registers;
        let r = |reg: crate::isa::Register| reg.index() as usize;

        match *instruction {
            // Memory
            Instruction::LDG { ty, dst, arg, index } => {
                let handle = buffer_binding(kernel, bindings, arg, Access::Load)?;
                regs[r(dst)] = memory.load_element(handle, ty, regs[r(index)])?;
            }
            Instruction::STG { ty, src, arg, index } => {
                let handle = buffer_binding(kernel, bindings, arg, Access::Store)?;
                memory.store_element(handle, ty, regs[r(index)], regs[r(src)])?;
            }
            Instruction::LDARG { ty, dst, arg } => match bindings.get(arg as usize) {
                Some(Binding::Scalar(value)) => regs[r(dst)] = ty.normalize(*value),
                _ => return Err(invalid_binding(kernel, arg as usize, "scalar")),
            },

            // Data Movement
            Instruction::MOV { dst, src } => regs[r(dst)] = regs[r(src)],
            Instruction::MOV_IMM { ty, dst, value } => regs[r(dst)] = ty.normalize(value),
            Instruction::CVT { dst_ty, dst, src } => regs[r(dst)] = dst_ty.normalize(regs[r(src)]),

            // Arithmetic
            Instruction::ADD { ty, dst, src1, src2 } => {
                regs[r(dst)] = ty.normalize(regs[r(src1)].wrapping_add(regs[r(src2)]));
            }
            Instruction::SUB { ty, dst, src1, src2 } => {
                regs[r(dst)] = ty.normalize(regs[r(src1)].wrapping_sub(regs[r(src2)]));
            }
            Instruction::MUL { ty, dst, src1, src2 } => {
                regs[r(dst)] = ty.normalize(regs[r(src1)].wrapping_mul(regs[r(src2)]));
            }
            Instruction::DIV { ty, dst, src1, src2 } => {
                regs[r(dst)] = divide(ty, regs[r(src1)], regs[r(src2)], false)?;
            }
            Instruction::REM { ty, dst, src1, src2 } => {
                regs[r(dst)] = divide(ty, regs[r(src1)], regs[r(src2)], true)?;
            }
            Instruction::NEG { ty, dst, src } => regs[r(dst)] = ty.normalize(regs[r(src)].wrapping_neg()),

            // Work-Item Queries
            Instruction::SREG { dst, query, dim } => {
                regs[r(dst)] = query.result_type().normalize(geometry.query(query, dim, group, lane.local) as i64);
            }

            // Synchronization / Control
            Instruction::BarSync { .. } => return Ok(Flow::Barrier),
            Instruction::EXIT => return Ok(Flow::Exit),
        }

        Ok(Flow::Next)
    }
}

#[derive(Clone, Copy)]
enum Access {
    Load,
    Store,
}

fn buffer_binding(kernel: &KernelProgram, bindings: &[Binding], arg: u8, access: Access) -> Result<MemHandle> {
    match bindings.get(arg as usize) {
        Some(Binding::Buffer {
            handle,
            readable,
            writable,
        }) => match access {
            Access::Load if !readable => Err(RuntimeError::access_violation(
                handle.id(),
                "kernel read from a write-only buffer",
            )),
            Access::Store if !writable => Err(RuntimeError::access_violation(
                handle.id(),
                "kernel write to a read-only buffer",
            )),
            _ => Ok(*handle),
        },
        _ => Err(invalid_binding(kernel, arg as usize, "buffer")),
    }
}

fn invalid_binding(kernel: &KernelProgram, index: usize, what: &str) -> RuntimeError {
    RuntimeError::InvalidArgValue {
        kernel: kernel.name.clone(),
        index: index as u32,
        reason: format!("argument does not match parameter '{what}'"),
    }
}

/// Integer division or remainder with C semantics for `ty`
fn divide(ty: Type, a: i64, b: i64, remainder: bool) -> Result<i64> {
    if b == 0 {
        return Err(RuntimeError::DivisionByZero);
    }
    let raw = match (ty.is_signed(), remainder) {
        (true, false) => a.wrapping_div(b),
        (true, true) => a.wrapping_rem(b),
        (false, false) => ((a as u64) / (b as u64)) as i64,
        (false, true) => ((a as u64) % (b as u64)) as i64,
    };
    Ok(ty.normalize(raw))
}
