#![feature(const_size_of_val, const_pointer_is_aligned)]

pub mod bytes;
