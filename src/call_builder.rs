use std::fmt;

use crate::{ApiResponse, Result};

const ROOT_NAMESPACE: &str = "flickr";

/// Something that can perform an API method call by its full dotted name.
pub trait MethodCaller {
    fn call_method(&self, method: &str, params: &[(&str, &str)]) -> Result<ApiResponse>;
}

/// Builds a dotted method name one segment at a time.
///
/// ```ignore
/// let info = CallBuilder::new(&flickr)
///     .descend("photos")
///     .descend("getInfo")
///     .call(&[("photo_id", "1234")])?;
/// ```
pub struct CallBuilder<'c, C: MethodCaller + ?Sized> {
    caller: &'c C,
    method_name: String,
}

impl<'c, C: MethodCaller + ?Sized> CallBuilder<'c, C> {
    /// A builder at the `flickr` root namespace.
    pub fn new(caller: &'c C) -> Self {
        Self::with_name(caller, ROOT_NAMESPACE)
    }

    pub fn with_name<N: Into<String>>(caller: &'c C, method_name: N) -> Self {
        CallBuilder {
            caller,
            method_name: method_name.into(),
        }
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// A new builder one level further down; `self` is left as it was.
    pub fn descend(&self, name: &str) -> Self {
        CallBuilder {
            caller: self.caller,
            method_name: format!("{}.{}", self.method_name, name),
        }
    }

    pub fn call(&self, params: &[(&str, &str)]) -> Result<ApiResponse> {
        self.caller.call_method(&self.method_name, params)
    }
}

impl<C: MethodCaller + ?Sized> Clone for CallBuilder<'_, C> {
    fn clone(&self) -> Self {
        CallBuilder {
            caller: self.caller,
            method_name: self.method_name.clone(),
        }
    }
}

impl<C: MethodCaller + ?Sized> fmt::Debug for CallBuilder<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallBuilder({:?})", self.method_name)
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<(String, Vec<(String, String)>)>>,
    }

    impl MethodCaller for Recorder {
        fn call_method(&self, method: &str, params: &[(&str, &str)]) -> Result<ApiResponse> {
            let params = params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            self.calls.borrow_mut().push((method.to_string(), params));
            Ok(ApiResponse::Text(String::new()))
        }
    }

    #[test]
    fn descends_into_namespaces() {
        let recorder = Recorder::default();
        let photos = CallBuilder::new(&recorder).descend("photos");
        assert_eq!(photos.method_name(), "flickr.photos");
        assert_eq!(format!("{:?}", photos), "CallBuilder(\"flickr.photos\")");

        let get_info = photos.descend("getInfo");
        assert_eq!(get_info.method_name(), "flickr.photos.getInfo");
        // descending leaves the parent untouched
        assert_eq!(photos.method_name(), "flickr.photos");
    }

    #[test]
    fn call_passes_name_and_params() {
        let recorder = Recorder::default();
        CallBuilder::new(&recorder)
            .descend("photos")
            .descend("getInfo")
            .call(&[("photo_id", "1234")])
            .unwrap();
        assert_eq!(
            recorder.calls.borrow().as_slice(),
            &[(
                "flickr.photos.getInfo".to_string(),
                vec![("photo_id".to_string(), "1234".to_string())]
            )]
        );
    }

    #[test]
    fn works_with_trait_objects() {
        let recorder = Recorder::default();
        let caller: &dyn MethodCaller = &recorder;
        CallBuilder::new(caller).descend("test").descend("echo").call(&[]).unwrap();
        assert_eq!(recorder.calls.borrow()[0].0, "flickr.test.echo");
    }
}
