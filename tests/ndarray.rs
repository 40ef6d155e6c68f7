use cnpz::{
    load_npy, read_npy, save_npy, write_npy, MemoryOrder, NpyArray, ReadNpyError, ReadNpyExt,
    SaveOptions, WriteNpyExt,
};
use ndarray::{array, s, Array1, Array2, Array3, ArrayD, Axis};
use num_complex::Complex;
use tempfile::tempdir;

#[test]
fn standard_layout_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("c.npy");
    let arr: Array3<f64> = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 100 + j * 10 + k) as f64);
    write_npy(&path, &arr).unwrap();

    let loaded = load_npy(&path).unwrap();
    assert_eq!(loaded.shape(), [2, 3, 4]);
    assert_eq!(loaded.memory_order(), MemoryOrder::C);
    let back: Array3<f64> = read_npy(&path).unwrap();
    assert_eq!(back, arr);
}

#[test]
fn transposed_array_is_written_in_fortran_order() {
    let arr = array![[1i32, 2, 3], [4, 5, 6]];
    let transposed = arr.t();
    let mut buf = Vec::new();
    transposed.write_npy(&mut buf).unwrap();

    let loaded = NpyArray::read_npy(&buf[..]).unwrap();
    assert_eq!(loaded.shape(), [3, 2]);
    assert_eq!(loaded.memory_order(), MemoryOrder::Fortran);
    assert_eq!(loaded.to_vec::<i32>().unwrap(), [1, 2, 3, 4, 5, 6]);
    let back = Array2::<i32>::read_npy(&buf[..]).unwrap();
    assert_eq!(back, transposed);
}

#[test]
fn strided_view_is_written_in_logical_order() {
    let arr = Array2::from_shape_vec((3, 4), (0u16..12).collect()).unwrap();
    let view = arr.slice(s![.., ..;2]);
    let mut buf = Vec::new();
    view.write_npy(&mut buf).unwrap();

    let loaded = NpyArray::read_npy(&buf[..]).unwrap();
    assert_eq!(loaded.memory_order(), MemoryOrder::C);
    assert_eq!(loaded.to_vec::<u16>().unwrap(), [0, 2, 4, 6, 8, 10]);
    assert_eq!(Array2::<u16>::read_npy(&buf[..]).unwrap(), view);
}

#[test]
fn appended_rows_extend_the_array() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rows.npy");
    let first = array![[1u8, 2], [3, 4]];
    write_npy(&path, &first).unwrap();
    save_npy(&path, &[5u8, 6], &[1, 2], SaveOptions::append()).unwrap();

    let merged = load_npy(&path).unwrap().to_ndarray::<u8, ndarray::Ix2>().unwrap();
    assert_eq!(merged, array![[1, 2], [3, 4], [5, 6]]);
    assert_eq!(merged.index_axis(Axis(0), 2), array![5, 6]);
}

#[test]
fn complex_and_bool_elements() {
    let complex = array![Complex::new(1.0f32, -1.0), Complex::new(0.5, 2.0)];
    let mut buf = Vec::new();
    complex.write_npy(&mut buf).unwrap();
    assert_eq!(Array1::<Complex<f32>>::read_npy(&buf[..]).unwrap(), complex);

    let flags = array![[true, false], [false, true]];
    let mut buf = Vec::new();
    flags.write_npy(&mut buf).unwrap();
    assert_eq!(ArrayD::<bool>::read_npy(&buf[..]).unwrap(), flags.into_dyn());
}

#[test]
fn mismatched_types_are_reported() {
    let mut buf = Vec::new();
    array![[1u32, 2], [3, 4]].write_npy(&mut buf).unwrap();

    assert!(matches!(
        Array2::<f32>::read_npy(&buf[..]),
        Err(ReadNpyError::WrongDescriptor(descr)) if descr == "<u4"
    ));
    assert!(matches!(
        Array2::<i32>::read_npy(&buf[..]),
        Err(ReadNpyError::WrongDescriptor(_))
    ));
    assert!(matches!(
        Array1::<u32>::read_npy(&buf[..]),
        Err(ReadNpyError::WrongNdim(Some(1), 2))
    ));
    assert_eq!(ArrayD::<u32>::read_npy(&buf[..]).unwrap().ndim(), 2);
}

#[test]
fn structured_arrays_are_not_ndarrays() {
    let records =
        NpyArray::from_records(&["a", "b"], &[(1u32, 2u32), (3, 4)], vec![2], MemoryOrder::C).unwrap();
    assert!(matches!(records.to_ndarray::<u32, ndarray::Ix1>(), Err(ReadNpyError::WrongDescriptor(_))));
}
