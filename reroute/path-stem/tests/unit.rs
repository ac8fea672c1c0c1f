use std::path::PathBuf;

use path_stem::*;
use rstest::rstest;

#[test]
fn stem_lowercases() {
    assert_eq!(
        module_stem("C:\\Windows\\System32\\D3D9.DLL").as_deref(),
        Some("d3d9")
    );
    assert_eq!(module_stem("dxgi.dll").as_deref(), Some("dxgi"));
    assert_eq!(module_stem(""), None);
}

#[rstest]
#[case("Foo.dll", "C:\\x\\FOO.DLL", true)]
#[case("dxgi.dll", "DXGI", true)]
#[case("d3d9.dll", "d3d11.dll", false)]
#[case("", "foo.dll", false)]
#[case("", "", false)]
fn stem_matching(#[case] a: &str, #[case] b: &str, #[case] expected: bool) {
    assert_eq!(stems_match(a, b), expected);
}

// Loader paths use backslashes whatever OS the portable core is built on.
#[rstest]
#[case("C:\\x\\FOO.DLL", Some("foo"))]
#[case("C:/x/FOO.DLL", Some("foo"))]
#[case("C:\\games\\bin/d3d9.dll", Some("d3d9"))]
#[case("C:\\games\\bin\\", None)]
#[case(".hidden", Some(".hidden"))]
fn stem_is_separator_agnostic(#[case] path: &str, #[case] expected: Option<&str>) {
    assert_eq!(module_stem(path).as_deref(), expected);
}

#[test]
fn narrow_buffer_to_path() {
    let buf = b"opengl32.dll\0garbage";
    assert_eq!(u8_buffer_to_path(buf), PathBuf::from("opengl32.dll"));

    // Unterminated buffers decode whole.
    assert_eq!(u8_buffer_to_path(b"user32"), PathBuf::from("user32"));
}

#[test]
fn wide_buffer_to_path() {
    let buf: Vec<u16> = "C:\\x\\dxgi.dll\0".encode_utf16().collect();
    assert_eq!(u16_buffer_to_path(&buf), PathBuf::from("C:\\x\\dxgi.dll"));
}

#[test]
fn pointer_decoding() {
    let narrow = b"d3d10.dll\0";
    let wide: Vec<u16> = "d3d11.dll\0".encode_utf16().collect();

    unsafe {
        assert_eq!(
            narrow_ptr_to_path(narrow.as_ptr()),
            Some(PathBuf::from("d3d10.dll"))
        );
        assert_eq!(
            wide_ptr_to_path(wide.as_ptr()),
            Some(PathBuf::from("d3d11.dll"))
        );
        assert_eq!(narrow_ptr_to_path(std::ptr::null()), None);
        assert_eq!(wide_ptr_to_path(std::ptr::null()), None);
    }
}
