/// Module containing utility functions for testing IMEI parsing
use rand::Rng;

/// Generates a random valid IMEI number
///
/// # Returns
/// * `String` - The generated IMEI
pub fn get_random_imei() -> String {
    let mut rng = rand::thread_rng();
    let mut imei: Vec<u8> = (0..14).map(|_| rng.gen_range(0..=9)).collect();

    // Calculate the checksum for the first 14 digits
    let mut checksum = 0;
    for (i, &digit) in imei.iter().rev().enumerate() {
        if i % 2 == 0 {
            let double = digit * 2;
            checksum += if double > 9 { double - 9 } else { double };
        } else {
            checksum += digit;
        }
    }

    // Calculate the final digit to make it valid
    let final_digit = (10 - (checksum % 10)) % 10;
    imei.push(final_digit);

    // Convert to string
    imei.iter().map(|d| d.to_string()).collect::<String>()
}
