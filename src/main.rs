fn main() {
    std::process::exit(redline_lib::run());
}
