use std::any::Any;

macro_rules! cfg_async_std {
    ($($item:item)*) => {
        $(
            #[cfg(feature = "use-async-std")]
            $item
        )*
    }
}

macro_rules! cfg_async_std_or_else {
    ($($item:item)*) => {
        $(
            #[cfg(all(feature = "use-tokio", not( feature = "use-async-std" ) ))]
            $item
        )*
    }
}

macro_rules! cfg_tokio {
    ($($item:item)*) => {
        $(
            #[cfg(feature = "use-tokio")]
            $item
        )*
    }
}

macro_rules! cfg_any_spawner {
    ($($item:item)*) => {
        $(
            #[cfg(any(feature = "use-async-std", feature = "use-tokio"))]
            $item
        )*
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(_) => "non-string panic payload".to_string(),
    }
}
