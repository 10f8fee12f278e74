//! Kernel Registry - Descriptor Resolution and Cache Identity
//!
//! Maps primitive names to constructors with their argument schemas and
//! parses pipeline descriptors like `stitch([scale(1),add(0),clamp(0,255),
//! cast(u8)])`. The argument-fingerprint LUT assigns a monotone integer to
//! each distinct argument string the first time it is seen, so two kernel
//! instances with the same configuration share cached code.
//!
//! @version 0.1.0
//! @author Veris Development Team

use std::sync::OnceLock;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use veris_core::element::ElementType;
use veris_core::error::{Error, Result};

use crate::dispatch::Kernel;
use crate::kernel::{quantize, PrimitiveKernel};
use crate::reduce::SumKernel;

// =============================================================================
// Static primitive table
// =============================================================================

type Factory = fn(&[&str]) -> Result<PrimitiveKernel>;

struct KernelSchema {
    name: &'static str,
    arity: usize,
    factory: Factory,
}

static STITCHABLE_KERNELS: &[KernelSchema] = &[
    KernelSchema {
        name: "square",
        arity: 0,
        factory: |_| Ok(PrimitiveKernel::Square),
    },
    KernelSchema {
        name: "abs",
        arity: 0,
        factory: |_| Ok(PrimitiveKernel::Abs),
    },
    KernelSchema {
        name: "scale",
        arity: 1,
        factory: |args| Ok(PrimitiveKernel::Scale(parse_number(args[0])?)),
    },
    KernelSchema {
        name: "add",
        arity: 1,
        factory: |args| Ok(PrimitiveKernel::Add(parse_number(args[0])?)),
    },
    KernelSchema {
        name: "pow",
        arity: 1,
        factory: |args| Ok(PrimitiveKernel::Pow(parse_number(args[0])?)),
    },
    KernelSchema {
        name: "cast",
        arity: 1,
        factory: |args| Ok(PrimitiveKernel::Cast(ElementType::from_name(args[0])?)),
    },
    KernelSchema {
        name: "clamp",
        arity: 2,
        factory: |args| {
            Ok(PrimitiveKernel::Clamp {
                min: parse_number(args[0])?,
                max: parse_number(args[1])?,
            })
        },
    },
    KernelSchema {
        name: "quantize",
        arity: 2,
        factory: |args| Ok(quantize(parse_number(args[0])?, parse_number(args[1])?)),
    },
];

// =============================================================================
// Descriptor parsing
// =============================================================================

fn parse_number(text: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| Error::BadKernelSpec(format!("expected a number, got `{text}`")))
}

/// Splits `name(args)` into its parts; a bare name has no argument list.
fn split_call(descriptor: &str) -> Result<(&str, Option<&str>)> {
    let descriptor = descriptor.trim();
    match descriptor.find('(') {
        None => Ok((descriptor, None)),
        Some(open) => {
            if !descriptor.ends_with(')') {
                return Err(Error::BadKernelSpec(descriptor.to_string()));
            }
            Ok((
                &descriptor[..open],
                Some(&descriptor[open + 1..descriptor.len() - 1]),
            ))
        }
    }
}

/// Splits on commas at bracket depth zero.
fn split_arguments(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() || !parts.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Parses a stitchable primitive descriptor.
pub fn parse_primitive(descriptor: &str) -> Result<PrimitiveKernel> {
    let (name, args) = split_call(descriptor)?;

    if name == "stitch" {
        let list = args.ok_or_else(|| Error::BadKernelSpec(descriptor.to_string()))?;
        let list = list.trim();
        let inner = list
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| Error::BadKernelSpec(descriptor.to_string()))?;
        let steps = split_arguments(inner)
            .into_iter()
            .filter(|step| !step.is_empty())
            .map(parse_primitive)
            .collect::<Result<Vec<_>>>()?;
        return Ok(PrimitiveKernel::Stitch(steps));
    }

    let schema = STITCHABLE_KERNELS
        .iter()
        .find(|schema| schema.name == name)
        .ok_or_else(|| Error::UnknownKernel(name.to_string()))?;

    let args = args.map(split_arguments).unwrap_or_default();
    if args.len() != schema.arity {
        return Err(Error::BadKernelSpec(format!(
            "{name} takes {} argument(s), got {}",
            schema.arity,
            args.len()
        )));
    }
    (schema.factory)(&args)
}

fn parse_sum(args: Option<&str>) -> Result<SumKernel> {
    let Some(args) = args else {
        return Ok(SumKernel::all());
    };
    let mut sum = SumKernel {
        channels: false,
        columns: false,
        rows: false,
        frames: false,
    };
    for axis in split_arguments(args) {
        match axis {
            "channels" => sum.channels = true,
            "columns" => sum.columns = true,
            "rows" => sum.rows = true,
            "frames" => sum.frames = true,
            other => {
                return Err(Error::BadKernelSpec(format!("unknown axis `{other}`")));
            }
        }
    }
    Ok(sum)
}

/// Resolves a kernel descriptor: a reducer (`sum`, optionally with an axis
/// list) or any stitchable primitive.
pub fn resolve(descriptor: &str) -> Result<Kernel> {
    let (name, args) = split_call(descriptor)?;
    if name == "sum" {
        return Ok(Kernel::Reducer(parse_sum(args)?));
    }
    Ok(Kernel::Stitchable(parse_primitive(descriptor)?))
}

// =============================================================================
// Argument fingerprint LUT
// =============================================================================

static ARGUMENT_LUT: OnceLock<Mutex<FxHashMap<String, u32>>> = OnceLock::new();

/// Returns the monotone integer assigned to an argument string, allocating
/// one on first encounter.
#[must_use]
pub fn argument_uid(arguments: &str) -> u32 {
    let lut = ARGUMENT_LUT.get_or_init(|| Mutex::new(FxHashMap::default()));
    let mut lut = lut.lock();
    let next = lut.len() as u32;
    *lut.entry(arguments.to_string()).or_insert(next)
}

/// The cache family key for a kernel configuration: the family name, plus
/// the argument fingerprint when the configuration has arguments.
#[must_use]
pub fn family_key(name: &str, arguments: &str) -> String {
    if arguments.is_empty() {
        name.to_string()
    } else {
        format!("{name}{}", argument_uid(arguments))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_primitives() {
        assert_eq!(parse_primitive("abs").unwrap(), PrimitiveKernel::Abs);
        assert_eq!(
            parse_primitive("scale(2.5)").unwrap(),
            PrimitiveKernel::Scale(2.5)
        );
        assert_eq!(
            parse_primitive("cast(u8)").unwrap(),
            PrimitiveKernel::Cast(ElementType::U8)
        );
        assert_eq!(
            parse_primitive("clamp(0,255)").unwrap(),
            PrimitiveKernel::Clamp {
                min: 0.0,
                max: 255.0
            }
        );
    }

    #[test]
    fn test_parse_stitch_nested() {
        let kernel = parse_primitive("stitch([scale(1),add(0),clamp(0,255),cast(u8)])").unwrap();
        let PrimitiveKernel::Stitch(steps) = kernel else {
            panic!("expected a stitch");
        };
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[3], PrimitiveKernel::Cast(ElementType::U8));

        let nested = parse_primitive("stitch([abs,stitch([square,add(1)])])").unwrap();
        let PrimitiveKernel::Stitch(steps) = nested else {
            panic!("expected a stitch");
        };
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn test_parse_quantize_is_stitch() {
        let kernel = parse_primitive("quantize(1,0)").unwrap();
        assert_eq!(
            kernel.descriptor(),
            "stitch([scale(1),add(0),clamp(0,255),cast(u8)])"
        );
    }

    #[test]
    fn test_parse_sum_axes() {
        let Kernel::Reducer(sum) = resolve("sum(columns)").unwrap() else {
            panic!("expected a reducer");
        };
        assert!(sum.columns && !sum.channels && !sum.rows && !sum.frames);

        let Kernel::Reducer(sum) = resolve("sum").unwrap() else {
            panic!("expected a reducer");
        };
        assert_eq!(sum, SumKernel::all());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_primitive("warp(1)").is_err());
        assert!(parse_primitive("scale()").is_err());
        assert!(parse_primitive("scale(1,2)").is_err());
        assert!(parse_primitive("stitch(scale(1))").is_err());
        assert!(resolve("sum(diagonals)").is_err());
    }

    #[test]
    fn test_argument_uid_is_stable() {
        let a = argument_uid("registry-test-a");
        let b = argument_uid("registry-test-b");
        assert_ne!(a, b);
        assert_eq!(argument_uid("registry-test-a"), a);
        assert_eq!(argument_uid("registry-test-b"), b);
    }

    #[test]
    fn test_family_key_omits_uid_without_arguments() {
        assert_eq!(family_key("abs", ""), "abs");
        let key = family_key("scale", "2.5");
        assert!(key.starts_with("scale"));
        assert!(key.len() > "scale".len());
    }
}
