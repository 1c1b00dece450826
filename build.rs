fn main() {
    #[cfg(feature = "libiio")]
    {
        println!("cargo:rustc-link-lib=iio");
    }
}
