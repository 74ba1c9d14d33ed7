mod common;

use std::io::Cursor;

use common::{fill_deterministic, sample_process, sample_program};
use script_persist::{
    read_object_file, read_vm_state, summarize_file, write_object_file, write_vm_state,
    LoadLimits, PersistConfig, PersistError,
};

fn tight_config() -> PersistConfig {
    PersistConfig {
        limits: LoadLimits {
            max_object_bytes: 1 << 16,
            max_properties: 32,
            max_segment_values: 4_096,
            max_string_bytes: 1 << 12,
            max_blob_bytes: 1 << 12,
            max_array_elements: 4_096,
            max_frames: 64,
        },
        ..PersistConfig::default()
    }
}

fn object_file_bytes() -> Vec<u8> {
    write_object_file(Cursor::new(Vec::new()), &sample_program(), &[], &PersistConfig::default())
        .expect("object file should write")
        .into_inner()
}

fn vm_state_bytes() -> Vec<u8> {
    let body = sample_program();
    let processes = vec![sample_process(1, &body), sample_process(2, &body)];
    write_vm_state(Cursor::new(Vec::new()), &processes, 1, &PersistConfig::default())
        .expect("vm state should write")
        .into_inner()
}

/// Overwrites a handful of bytes at pseudo-random positions.
fn mutate(original: &[u8], seed: u64) -> Vec<u8> {
    let mut noise = [0u8; 16];
    fill_deterministic(&mut noise, seed);
    let mut bytes = original.to_vec();
    for pair in noise.chunks_exact(4) {
        let position = u16::from_le_bytes([pair[0], pair[1]]) as usize % bytes.len();
        bytes[position] = pair[2];
    }
    bytes
}

#[test]
fn every_truncation_of_an_object_file_fails_cleanly() {
    let bytes = object_file_bytes();
    let config = tight_config();
    for len in 0..bytes.len() {
        // A cut on an object boundary is a shorter, valid file.
        if let Err(err) = read_object_file(Cursor::new(bytes[..len].to_vec()), &config) {
            assert!(
                err.is_truncation() || matches!(err, PersistError::SizeBudget { .. }),
                "cut at {len}: {err:?}"
            );
        }
    }
    read_object_file(Cursor::new(bytes), &config).expect("full file should load");
}

#[test]
fn mutated_object_files_never_panic() {
    let bytes = object_file_bytes();
    let config = tight_config();
    for seed in 1..=512u64 {
        let mutated = mutate(&bytes, 0xC0FF_EE00 ^ seed);
        let _ = read_object_file(Cursor::new(mutated.clone()), &config);
        let _ = summarize_file(Cursor::new(mutated), config.limits);
    }
}

#[test]
fn mutated_vm_states_never_panic() {
    let bytes = vm_state_bytes();
    let config = tight_config();
    for seed in 1..=512u64 {
        let mutated = mutate(&bytes, 0x5EED_0000 ^ seed);
        let _ = read_vm_state(Cursor::new(mutated), &config);
    }
}

#[test]
fn random_noise_after_a_valid_header_never_panics() {
    let valid = object_file_bytes();
    let header = &valid[..14];
    let config = tight_config();
    let mut noise = vec![0u8; 512];
    for seed in 1..=128u64 {
        fill_deterministic(&mut noise, 0xA11C_E55 ^ seed);
        let mut bytes = header.to_vec();
        bytes.extend_from_slice(&noise);
        let _ = read_object_file(Cursor::new(bytes), &config);
    }
}
