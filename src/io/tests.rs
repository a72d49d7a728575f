//! Integration tests for checkpoint I/O

use super::*;
use ndarray::{arr1, arr2};
use safetensors::Dtype;
use std::collections::BTreeMap;

fn weight(rows: usize, cols: usize) -> StoredTensor {
    let values = ndarray::Array::from_shape_fn((rows, cols), |(r, c)| (r * cols + c) as f32);
    StoredTensor::from_f32(&values.into_dyn(), Dtype::F32).unwrap()
}

fn quantized_layer(tensors: &mut BTreeMap<String, StoredTensor>, layer: &str) {
    tensors.insert(merge_names(layer, "weight"), weight(2, 4));
    tensors.insert(
        merge_names(layer, "weight_scale"),
        StoredTensor::from_f32(&arr2(&[[0.5f32], [0.25]]).into_dyn(), Dtype::F16).unwrap(),
    );
    tensors.insert(
        merge_names(layer, "weight_zero_point"),
        StoredTensor::from_i32(&arr2(&[[0i32], [-3]]).into_dyn(), Dtype::I8).unwrap(),
    );
}

#[test]
fn test_single_file_mappings() {
    let dir = tempfile::tempdir().unwrap();
    let mut tensors = BTreeMap::new();
    quantized_layer(&mut tensors, "fc1");
    tensors.insert("fc1.bias".into(), StoredTensor::from_f32(&arr1(&[1.0f32]).into_dyn(), Dtype::F32).unwrap());

    let file = dir.path().join(SAFE_WEIGHTS_NAME);
    save_tensors(&tensors, &file, None).unwrap();

    // a directory and the file itself index the same tensors
    let from_dir = get_weight_mappings(dir.path()).unwrap();
    let from_file = get_weight_mappings(&file).unwrap();
    assert_eq!(from_dir, from_file);
    assert_eq!(from_dir.len(), 4);
    assert!(from_dir.values().all(|p| p == &file));
}

#[test]
fn test_sharded_nested_mappings() {
    let dir = tempfile::tempdir().unwrap();
    let mut tensors = BTreeMap::new();
    quantized_layer(&mut tensors, "model.layers.0.q_proj");
    quantized_layer(&mut tensors, "model.layers.1.q_proj");
    tensors.insert("lm_head.weight".into(), weight(3, 4));

    let shards = save_sharded(&tensors, dir.path(), 48).unwrap();
    assert!(shards.len() > 1);

    let (nested, others) = get_nested_weight_mappings_with_others(
        dir.path(),
        &["weight_scale", "weight_zero_point"],
    )
    .unwrap();
    assert_eq!(nested.len(), 2);
    let layer0 = &nested["model.layers.0.q_proj"];
    assert_eq!(layer0.len(), 2);
    assert!(layer0["weight_scale"].starts_with(dir.path()));

    assert_eq!(others.len(), 3);
    assert!(others.contains_key("lm_head.weight"));
    assert!(others.contains_key("model.layers.1.q_proj.weight"));

    let only_nested =
        get_nested_weight_mappings(dir.path(), &["weight_scale", "weight_zero_point"]).unwrap();
    assert_eq!(only_nested, nested);
}

#[test]
fn test_quantization_state_dict_across_shards() {
    let dir = tempfile::tempdir().unwrap();
    let mut tensors = BTreeMap::new();
    quantized_layer(&mut tensors, "a");
    quantized_layer(&mut tensors, "b");
    save_sharded(&tensors, dir.path(), 40).unwrap();

    let state = get_quantization_state_dict(dir.path()).unwrap();
    assert_eq!(state.len(), 4);
    assert!(state.keys().all(|k| is_quantization_param(k)));

    let zp = &state["b.weight_zero_point"];
    assert_eq!(zp.dtype(), Dtype::I8);
    assert_eq!(zp.to_f32().unwrap()[[1, 0]], -3.0);

    let scale = &state["a.weight_scale"];
    assert_eq!(scale.dtype(), Dtype::F16);
    assert_eq!(scale.to_f32().unwrap()[[1, 0]], 0.25);
}

#[test]
fn test_header_entries_match_saved_tensors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("w.safetensors");
    let tensors = BTreeMap::from([("w".to_string(), weight(3, 2))]);
    save_tensors(&tensors, &path, None).unwrap();

    let entries = read_tensor_entries(&path).unwrap();
    assert_eq!(entries["w"].dtype, "F32");
    assert_eq!(entries["w"].shape, vec![3, 2]);
    assert_eq!(entries["w"].data_offsets, (0, 24));
}
