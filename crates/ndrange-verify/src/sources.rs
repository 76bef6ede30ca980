//! Kernel sources of the verification scenario

/// Two-dimensional vector combine
///
/// The `local_id` terms make the output depend on the work-group
/// partitioning, see [`crate::index_model`].
pub const VECTOR_COMBINE_SOURCE: &str = r#"
__kernel void vecAdd(__constant int *a, __constant int *b, __global int *c)
{
    unsigned int i = get_global_id(0) * get_global_size(1) + get_global_id(1);
    c[i] = a[i] + b[i] + get_local_id(0) * get_local_size(1) + get_local_id(1);
}
"#;

/// Neighborhood average across a work-group barrier
pub const BARRIER_SOURCE: &str = r#"
__kernel void barrier_kernel(global int *buffer)
{
    private int a = buffer[get_global_id(0) - 1] + buffer[get_global_id(0)] + buffer[get_global_id(0) + 1];
    barrier(CLK_LOCAL_MEM_FENCE);
    buffer[get_global_id(0)] = a / 3;
}
"#;

pub const VECTOR_COMBINE_KERNEL: &str = "vecAdd";
pub const BARRIER_KERNEL: &str = "barrier_kernel";

/// Sources and entry points the scenario builds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSources {
    pub vector_combine: &'static str,
    pub vector_combine_kernel: &'static str,
    pub barrier: &'static str,
    pub barrier_kernel: &'static str,
}

impl Default for KernelSources {
    fn default() -> Self {
        Self {
            vector_combine: VECTOR_COMBINE_SOURCE,
            vector_combine_kernel: VECTOR_COMBINE_KERNEL,
            barrier: BARRIER_SOURCE,
            barrier_kernel: BARRIER_KERNEL,
        }
    }
}
