use std::{fmt, result};

/// A result of a function that may return a `PlutoError`.
pub type Result<T> = result::Result<T, PlutoError>;

// Macro to create an error enum with From converters for each wrapped library
// error, plus message-carrying variants for the driver's own failure kinds
macro_rules! define_errcodes {
    [
        $typename:ident =>
        wraps { $( $wname:ident : $class:ty ),+ $(,)? },
        kinds { $( $kname:ident ),+ $(,)? }
    ] => {
        #[derive(Debug)]
        pub enum $typename {
            $( $wname($class), )+
            $( $kname(String), )+
        }

        impl fmt::Display for $typename {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match *self {
                    $( $typename::$wname(ref err) => fmt::Display::fmt(err, f), )+
                    $( $typename::$kname(ref msg) => write!(f, "{}: {}", stringify!($kname), msg), )+
                }
            }
        }

        impl std::error::Error for $typename {}

        $(
            impl From<$class> for $typename {
                fn from(e: $class) -> Self {
                    $typename::$wname(e)
                }
            }
        )+
    };
}

define_errcodes![
    PlutoError =>
    wraps {
        Usb: rusb::Error,
        Io: std::io::Error,
    },
    kinds {
        DeviceNotFound,
        SubdeviceMissing,
        ChannelUnavailable,
        HardwareWrite,
        Acquisition,
        ConsumerTornDown,
    }
];

impl PlutoError {
    /// Errors after which the running stream cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlutoError::ChannelUnavailable(_) | PlutoError::ConsumerTornDown(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind() {
        let err = PlutoError::SubdeviceMissing("ad9361-phy".to_string());
        assert_eq!(err.to_string(), "SubdeviceMissing: ad9361-phy");
    }

    #[test]
    fn test_io_error_converts() {
        let err: PlutoError = std::io::Error::from_raw_os_error(110).into();
        assert!(matches!(err, PlutoError::Io(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(PlutoError::ChannelUnavailable(String::new()).is_fatal());
        assert!(PlutoError::ConsumerTornDown(String::new()).is_fatal());
        assert!(!PlutoError::Acquisition(String::new()).is_fatal());
    }
}
