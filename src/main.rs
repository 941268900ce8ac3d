fn main() {
    friction_lib::run()
}
