use crate::{
    npy::{
        check_at_end,
        elements::{write_chunked, write_slice},
        header::{Header, MemoryOrder},
        read_array,
    },
    Element, NpyArray, ReadNpyError, ReadNpyExt, WriteNpyError, WriteNpyExt,
};
use ndarray::{prelude::*, Data, DataOwned, IntoDimension as _};
use std::io;

impl<A, S, D> WriteNpyExt for ArrayBase<S, D>
where
    A: Element,
    S: Data<Elem = A>,
    D: Dimension,
{
    fn write_npy<W: io::Write>(&self, mut writer: W) -> Result<(), WriteNpyError> {
        let (memory_order, contiguous) = if self.is_standard_layout() {
            (MemoryOrder::C, self.as_slice_memory_order())
        } else if self.view().reversed_axes().is_standard_layout() {
            (MemoryOrder::Fortran, self.as_slice_memory_order())
        } else {
            (MemoryOrder::C, None)
        };
        Header { fields: vec![A::field()], memory_order, shape: self.shape().to_owned() }
            .write(&mut writer)?;
        match contiguous {
            Some(data) => write_slice(data, &mut writer)?,
            None => {
                let pack = |value: A, out: &mut [u8]| value.write_le(out);
                write_chunked(self.iter().copied(), self.len(), A::WORD_SIZE, pack, &mut writer)?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

impl<A, S, D> ReadNpyExt for ArrayBase<S, D>
where
    A: Element,
    S: DataOwned<Elem = A>,
    D: Dimension,
{
    fn read_npy<R: io::Read>(mut reader: R) -> Result<Self, ReadNpyError> {
        let array = read_array(&mut reader)?;
        check_at_end(reader)?;
        to_array_base(&array)
    }
}

impl NpyArray {
    /// Copies a single-field array into an [`ndarray::Array`] with the stored
    /// memory order.
    ///
    /// Fails with [`ReadNpyError::WrongDescriptor`] unless the field has the
    /// type of `A`, and with [`ReadNpyError::WrongNdim`] if the rank does not
    /// fit `D`.
    pub fn to_ndarray<A: Element, D: Dimension>(&self) -> Result<Array<A, D>, ReadNpyError> {
        to_array_base(self)
    }
}

fn to_array_base<A, S, D>(array: &NpyArray) -> Result<ArrayBase<S, D>, ReadNpyError>
where
    A: Element,
    S: DataOwned<Elem = A>,
    D: Dimension,
{
    let wrong_descriptor = || {
        let descr: Vec<_> = array.fields().iter().map(ToString::to_string).collect();
        ReadNpyError::WrongDescriptor(descr.join(", "))
    };
    match array.fields() {
        [field] if field.label.is_none() && field.same_type(&A::field()) => {}
        _ => return Err(wrong_descriptor()),
    }
    let data = array.to_vec::<A>().map_err(|_| wrong_descriptor())?;
    let shape = array.shape().to_vec().into_dimension();
    let ndim = shape.ndim();
    ArrayBase::from_shape_vec(shape.set_f(array.memory_order().is_fortran()), data)
        .map_err(|_| ReadNpyError::LengthOverflow)?
        .into_dimensionality()
        .map_err(|_| ReadNpyError::WrongNdim(D::NDIM, ndim))
}
